use std::path::PathBuf;

use clap::{Args, ValueEnum};
use modelbox::{LocalRuntime, RuntimeOptions, Strategy};

#[derive(Args, Debug)]
pub struct GlobalFlags {
    /// Sandbox root directory
    #[arg(long, global = true, env = "MODELBOX_HOME")]
    pub home: Option<PathBuf>,

    /// Provisioning strategy
    #[arg(long, global = true, value_enum, default_value_t = StrategyArg::Interposition)]
    pub strategy: StrategyArg,

    /// Loopback address the server listens on
    #[arg(long, global = true, env = "MODELBOX_LISTEN")]
    pub listen: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum StrategyArg {
    Interposition,
    Bootstrap,
    DirectBinary,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Interposition => Strategy::Interposition,
            StrategyArg::Bootstrap => Strategy::Bootstrap,
            StrategyArg::DirectBinary => Strategy::DirectBinary,
        }
    }
}

impl GlobalFlags {
    pub fn create_runtime(&self) -> anyhow::Result<LocalRuntime> {
        let mut options = RuntimeOptions::default().with_strategy(self.strategy.into());
        if let Some(home) = &self.home {
            options.home_dir = home.clone();
        }
        if let Some(listen) = &self.listen {
            options.listen_addr = listen.clone();
        }
        Ok(LocalRuntime::new(options)?)
    }
}

/// Turn the runtime's classified last error into the message the user sees,
/// remediation hint included.
pub fn report_failure(runtime: &LocalRuntime) -> anyhow::Error {
    match runtime.last_error() {
        Some(record) => anyhow::anyhow!(
            "{} (while {})\nhint: {}",
            record.message,
            record.phase.describe(),
            record.code.remediation()
        ),
        None => anyhow::anyhow!("operation failed with no recorded error"),
    }
}
