//! Host platform detection.
//!
//! Produces the `{os, architecture}` pair used to pick one entry out of a
//! manifest list. Values use OCI spelling (`linux`, `amd64`, `arm64`, ...)
//! so they compare directly against the registry's `platform` objects.

/// Operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    Darwin,
    Windows,
    Unknown,
}

/// CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Amd64,
    Arm64,
    Arm,
    I386,
    Ppc64le,
    S390x,
    Riscv64,
    Unknown,
}

impl Os {
    /// OCI spelling of the OS.
    pub fn as_oci_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
            Self::Unknown => "unknown",
        }
    }
}

impl Arch {
    /// OCI spelling of the architecture (GOARCH names).
    pub fn as_oci_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
            Self::I386 => "386",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
            Self::Riscv64 => "riscv64",
            Self::Unknown => "unknown",
        }
    }
}

/// Platform selector derived from the host.
///
/// Not user-overridable: running a layer built for another architecture
/// would populate the jail with binaries that cannot execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    /// Operating system.
    pub os: Os,
    /// CPU architecture.
    pub arch: Arch,
}

impl Platform {
    /// Detects the current platform.
    pub fn detect() -> Self {
        Self {
            os: Self::detect_os(),
            arch: Self::detect_arch(),
        }
    }

    /// Detects the operating system.
    fn detect_os() -> Os {
        #[cfg(target_os = "linux")]
        return Os::Linux;

        #[cfg(target_os = "macos")]
        return Os::Darwin;

        #[cfg(target_os = "windows")]
        return Os::Windows;

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        return Os::Unknown;
    }

    /// Detects the CPU architecture.
    fn detect_arch() -> Arch {
        #[cfg(target_arch = "x86_64")]
        return Arch::Amd64;

        #[cfg(target_arch = "aarch64")]
        return Arch::Arm64;

        #[cfg(target_arch = "arm")]
        return Arch::Arm;

        #[cfg(target_arch = "x86")]
        return Arch::I386;

        #[cfg(all(target_arch = "powerpc64", target_endian = "little"))]
        return Arch::Ppc64le;

        #[cfg(target_arch = "s390x")]
        return Arch::S390x;

        #[cfg(target_arch = "riscv64")]
        return Arch::Riscv64;

        #[cfg(not(any(
            target_arch = "x86_64",
            target_arch = "aarch64",
            target_arch = "arm",
            target_arch = "x86",
            all(target_arch = "powerpc64", target_endian = "little"),
            target_arch = "s390x",
            target_arch = "riscv64"
        )))]
        return Arch::Unknown;
    }

    /// OCI `os` value.
    pub fn os_str(&self) -> &'static str {
        self.os.as_oci_str()
    }

    /// OCI `architecture` value.
    pub fn arch_str(&self) -> &'static str {
        self.arch.as_oci_str()
    }

    /// Exact-match test against a manifest list entry's platform.
    ///
    /// An unsupported host matches nothing, so it never picks up the
    /// `unknown/unknown` attestation entries registries publish.
    pub fn matches(&self, os: &str, architecture: &str) -> bool {
        if self.os == Os::Unknown || self.arch == Arch::Unknown {
            return false;
        }
        self.os_str() == os && self.arch_str() == architecture
    }

    /// Returns the OCI platform string (e.g., "linux/amd64").
    pub fn oci_platform(&self) -> String {
        format!("{}/{}", self.os_str(), self.arch_str())
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.oci_platform())
    }
}
