//! Host CPU architecture detection.
//!
//! The host OS reports the ABIs it can execute as an ordered list of strings
//! (e.g. `["arm64-v8a", "armeabi-v7a"]`). Each download source spells
//! architectures differently, so [`CpuArch`] carries one accessor per
//! artifact family instead of a single tag.

/// Canonical architecture tag, chosen by fixed precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuArch {
    /// 64-bit ARM (highest precedence, and the default when nothing matches).
    Arm64,
    /// 32-bit ARM.
    Arm32,
    /// 64-bit x86.
    X86_64,
    /// 32-bit x86.
    X86,
}

impl CpuArch {
    /// Resolve the reported ABI set to one canonical tag.
    ///
    /// Pure and total: an empty or unrecognized set yields [`CpuArch::Arm64`],
    /// the dominant architecture for the target device class.
    pub fn resolve(reported_abis: &[&str]) -> Self {
        const PRECEDENCE: [CpuArch; 4] =
            [CpuArch::Arm64, CpuArch::Arm32, CpuArch::X86_64, CpuArch::X86];

        for candidate in PRECEDENCE {
            if reported_abis.iter().any(|abi| candidate.matches_abi(abi)) {
                return candidate;
            }
        }
        CpuArch::Arm64
    }

    fn matches_abi(&self, abi: &str) -> bool {
        match self {
            Self::Arm64 => matches!(abi, "arm64-v8a" | "aarch64" | "arm64"),
            Self::Arm32 => matches!(abi, "armeabi-v7a" | "armeabi" | "armv7l" | "arm"),
            Self::X86_64 => matches!(abi, "x86_64" | "amd64"),
            Self::X86 => matches!(abi, "x86" | "i686" | "i386"),
        }
    }

    /// Tag used in server release archive names.
    pub fn server_tag(&self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::Arm32 => "arm",
            Self::X86_64 => "amd64",
            Self::X86 => "386",
        }
    }

    /// Tag used in minimal rootfs image names.
    pub fn rootfs_tag(&self) -> &'static str {
        match self {
            Self::Arm64 => "aarch64",
            Self::Arm32 => "armv7",
            Self::X86_64 => "x86_64",
            Self::X86 => "x86",
        }
    }

    /// Tag used in interposition binary release names.
    pub fn interposition_tag(&self) -> &'static str {
        match self {
            Self::Arm64 => "aarch64",
            Self::Arm32 => "armv7a",
            Self::X86_64 => "x86_64",
            Self::X86 => "i686",
        }
    }

    /// Tag used in bootstrap prefix bundle names.
    pub fn bootstrap_tag(&self) -> &'static str {
        match self {
            Self::Arm64 => "aarch64",
            Self::Arm32 => "arm",
            Self::X86_64 => "x86_64",
            Self::X86 => "i686",
        }
    }
}
