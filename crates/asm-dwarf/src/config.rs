//! Target and emission configuration.

use alloc::string::String;
use core::fmt;

/// Target architecture.
///
/// Selects the address size written into the debug sections and the minimum
/// instruction length that scales address advances in the line program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Arch {
    /// 32-bit x86 protected mode.
    X86,
    /// 64-bit x86 long mode.
    X86_64,
    /// ARM A32 (ARMv7 and below).
    Arm,
    /// ARM T32 (Thumb-2).
    Thumb,
    /// ARMv8-A 64-bit.
    Aarch64,
    /// RISC-V 32-bit.
    Rv32,
    /// RISC-V 64-bit.
    Rv64,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X86 => write!(f, "x86"),
            Arch::X86_64 => write!(f, "x86_64"),
            Arch::Arm => write!(f, "ARM"),
            Arch::Thumb => write!(f, "Thumb"),
            Arch::Aarch64 => write!(f, "AArch64"),
            Arch::Rv32 => write!(f, "RV32"),
            Arch::Rv64 => write!(f, "RV64"),
        }
    }
}

impl Arch {
    /// Size of a target address in bytes.
    #[must_use]
    pub fn address_size(self) -> u8 {
        match self {
            Arch::X86 | Arch::Arm | Arch::Thumb | Arch::Rv32 => 4,
            Arch::X86_64 | Arch::Aarch64 | Arch::Rv64 => 8,
        }
    }

    /// Smallest instruction size; line-program address advances are
    /// expressed in multiples of it.
    ///
    /// ARM and Thumb share 2 so that mixed-mode code stays representable;
    /// RISC-V uses 2 to cover the C extension.
    #[must_use]
    pub fn min_insn_length(self) -> u8 {
        match self {
            Arch::X86 | Arch::X86_64 => 1,
            Arch::Arm | Arch::Thumb | Arch::Rv32 | Arch::Rv64 => 2,
            Arch::Aarch64 => 4,
        }
    }
}

/// How repeated `(file, line)` samples are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleMode {
    /// One sample per change of source line; used when the assembler
    /// generates line info for hand-written assembly itself.
    #[default]
    Sparse,
    /// Every call records a sample; used when a compiler drives `.loc` and
    /// deliberately emits duplicate rows (prologue markers).
    Dense,
}

/// Configurable resource limits.
///
/// # Examples
///
/// ```
/// use asm_dwarf::{Arch, LineConfig, ResourceLimits};
///
/// let config = LineConfig::new(Arch::X86_64).limits(ResourceLimits {
///     max_files: 16,
///     max_samples: 1_000,
///     max_relaxation_passes: 50,
/// });
/// assert_eq!(config.resource_limits().max_files, 16);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceLimits {
    /// Maximum number of file-table slots. Default: 65,536.
    pub max_files: usize,
    /// Maximum number of recorded location samples. Default: 4,000,000.
    pub max_samples: usize,
    /// Maximum layout relaxation passes before giving up. Default: 100.
    pub max_relaxation_passes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_files: 65_536,
            max_samples: 4_000_000,
            max_relaxation_passes: 100,
        }
    }
}

/// Settings for line-table and companion-section emission.
///
/// # Examples
///
/// ```
/// use asm_dwarf::{Arch, LineConfig, SampleMode};
///
/// let config = LineConfig::new(Arch::Aarch64)
///     .mode(SampleMode::Dense)
///     .name("boot.s")
///     .comp_dir("/src/kernel");
/// assert_eq!(config.address_size(), 8);
/// assert_eq!(config.min_insn_length(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineConfig {
    arch: Arch,
    mode: SampleMode,
    default_is_stmt: bool,
    name: String,
    comp_dir: String,
    producer: String,
    limits: ResourceLimits,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self::new(Arch::X86_64)
    }
}

impl LineConfig {
    /// Defaults for `arch`: sparse sampling, `is_stmt` on, empty names.
    pub fn new(arch: Arch) -> Self {
        Self {
            arch,
            mode: SampleMode::Sparse,
            default_is_stmt: true,
            name: String::new(),
            comp_dir: String::new(),
            producer: String::from(concat!("asm-dwarf ", env!("CARGO_PKG_VERSION"))),
            limits: ResourceLimits::default(),
        }
    }

    /// Set the sampling mode.
    pub fn mode(mut self, mode: SampleMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the `default_is_stmt` header flag.
    pub fn default_is_stmt(mut self, is_stmt: bool) -> Self {
        self.default_is_stmt = is_stmt;
        self
    }

    /// Set `DW_AT_name` of the compile unit.
    pub fn name(mut self, name: &str) -> Self {
        self.name = String::from(name);
        self
    }

    /// Set `DW_AT_comp_dir` of the compile unit.
    pub fn comp_dir(mut self, dir: &str) -> Self {
        self.comp_dir = String::from(dir);
        self
    }

    /// Set `DW_AT_producer` of the compile unit.
    pub fn producer(mut self, producer: &str) -> Self {
        self.producer = String::from(producer);
        self
    }

    /// Replace the resource limits.
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Target architecture.
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Sampling mode.
    pub fn sample_mode(&self) -> SampleMode {
        self.mode
    }

    /// Whether rows start as statements.
    pub fn is_stmt_default(&self) -> bool {
        self.default_is_stmt
    }

    /// Address size in bytes.
    pub fn address_size(&self) -> u8 {
        self.arch.address_size()
    }

    /// Minimum instruction length.
    pub fn min_insn_length(&self) -> u8 {
        self.arch.min_insn_length()
    }

    /// Compile-unit name.
    pub fn unit_name(&self) -> &str {
        &self.name
    }

    /// Compilation directory.
    pub fn unit_comp_dir(&self) -> &str {
        &self.comp_dir
    }

    /// Producer string.
    pub fn unit_producer(&self) -> &str {
        &self.producer
    }

    /// Resource limits.
    pub fn resource_limits(&self) -> &ResourceLimits {
        &self.limits
    }
}
