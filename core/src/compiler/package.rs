//! Packaging: lays code, metadata, data and stack out in one buffer.
//!
//! ```text
//! ┌──────┬──────────────────────────────┬─────┬──────┬───────┐
//! │ code │ metadata (data + stack slots)│ pad │ data │ stack │
//! └──────┴──────────────────────────────┴─────┴──────┴───────┘
//!                                             ▲ 4-byte aligned
//! ```
//!
//! The buffer size comes from a ladder of capacity tiers so hosts can pool
//! buffers; programs that fit no tier (or hosts that ask for it) get an exact
//! allocation.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::api::options::CompileOptions;
use crate::compiler::error::CompileErrorKind;
use crate::compiler::pipeline::CompilationState;
use crate::compiler::validation::run_validation;
use crate::parser::tokenizer::normalize_numeric_literal;
use crate::vm::error::VmError;
use crate::vm::memory::SLOT_BYTES;

/// Stack capacity, in slots, of the provisional package used to measure
/// stack usage.
pub const MEASUREMENT_STACK_SLOTS: usize = 256;

/// Name of the define that overrides the stack size (in slots).
pub const STACK_SIZE_DEFINE: &str = "stack_size";

// ============================================================================
// Sizes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CapacityTier {
    B32,
    B64,
    B96,
    B128,
    B192,
    B256,
    B384,
    B512,
    B640,
    B768,
    B896,
    B960,
}

impl CapacityTier {
    pub const ALL: [CapacityTier; 12] = [
        CapacityTier::B32,
        CapacityTier::B64,
        CapacityTier::B96,
        CapacityTier::B128,
        CapacityTier::B192,
        CapacityTier::B256,
        CapacityTier::B384,
        CapacityTier::B512,
        CapacityTier::B640,
        CapacityTier::B768,
        CapacityTier::B896,
        CapacityTier::B960,
    ];

    pub fn bytes(self) -> usize {
        match self {
            CapacityTier::B32 => 32,
            CapacityTier::B64 => 64,
            CapacityTier::B96 => 96,
            CapacityTier::B128 => 128,
            CapacityTier::B192 => 192,
            CapacityTier::B256 => 256,
            CapacityTier::B384 => 384,
            CapacityTier::B512 => 512,
            CapacityTier::B640 => 640,
            CapacityTier::B768 => 768,
            CapacityTier::B896 => 896,
            CapacityTier::B960 => 960,
        }
    }

    /// Smallest tier holding `bytes`.
    pub fn fitting(bytes: usize) -> Option<CapacityTier> {
        Self::ALL.into_iter().find(|t| t.bytes() >= bytes)
    }
}

/// Allocated size of a package buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageSize {
    Tier(CapacityTier),
    Exact(usize),
}

impl PackageSize {
    pub fn bytes(self) -> usize {
        match self {
            PackageSize::Tier(t) => t.bytes(),
            PackageSize::Exact(n) => n,
        }
    }
}

/// Allocation strategy requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetAllocator {
    /// Round up to a capacity tier when one fits.
    #[default]
    Pooled,
    /// Always allocate exactly what is used.
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PackageLayout {
    /// Code, metadata, data and stack in one buffer.
    #[default]
    Full,
    /// Code and metadata only; the data image is handed out separately for
    /// hosts that own their data blocks (batched execution).
    CodeOnly,
}

// ============================================================================
// Package
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageHeader {
    pub code_size: usize,
    /// One byte per data slot plus one per stack slot.
    pub metadata_size: usize,
    pub data_slots: usize,
    pub stack_slots: usize,
    pub padding: usize,
    /// Byte offset of the data region; equals the used size for `CodeOnly`.
    pub data_offset: usize,
    pub data_size: usize,
    pub stack_size: usize,
    /// Bytes actually used by the regions present in the buffer.
    pub used_size: usize,
    pub size: PackageSize,
    pub layout: PackageLayout,
}

impl PackageHeader {
    pub fn metadata_offset(&self) -> usize {
        self.code_size
    }

    pub fn total_size(&self) -> usize {
        self.size.bytes()
    }

    /// Bytes of one instance's data block (data + stack).
    pub fn instance_size(&self) -> usize {
        self.data_size + self.stack_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackageError {
    #[error("package buffer of {actual} bytes does not match its header ({expected} bytes)")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("package header is inconsistent: {0}")]
    InconsistentHeader(&'static str),
}

/// Immutable, packaged program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    header: PackageHeader,
    buffer: Vec<u8>,
}

/// Inputs of [`Package::assemble`].
#[derive(Debug, Clone, Copy)]
pub struct PackageParts<'a> {
    pub code: &'a [u8],
    /// Metadata of the data slots; stack metadata starts out empty.
    pub data_metadata: &'a [u8],
    pub data_image: &'a [u8],
    pub stack_slots: usize,
    pub layout: PackageLayout,
    pub allocator: TargetAllocator,
}

impl Package {
    pub fn assemble(parts: PackageParts<'_>) -> Package {
        let data_slots = parts.data_metadata.len();
        let code_size = parts.code.len();
        let metadata_size = data_slots + parts.stack_slots;
        let unaligned = code_size + metadata_size;
        let padding = (SLOT_BYTES - unaligned % SLOT_BYTES) % SLOT_BYTES;
        let data_offset = unaligned + padding;
        let data_size = data_slots * SLOT_BYTES;
        let stack_size = parts.stack_slots * SLOT_BYTES;
        let used_size = match parts.layout {
            PackageLayout::Full => data_offset + data_size + stack_size,
            PackageLayout::CodeOnly => data_offset,
        };
        let size = match parts.allocator {
            TargetAllocator::Pooled => CapacityTier::fitting(used_size)
                .map(PackageSize::Tier)
                .unwrap_or(PackageSize::Exact(used_size)),
            TargetAllocator::Exact => PackageSize::Exact(used_size),
        };
        trace!(
            code_size,
            metadata_size,
            data_size,
            stack_size,
            ?size,
            "Assembling package"
        );

        let mut buffer = vec![0u8; size.bytes()];
        buffer[..code_size].copy_from_slice(parts.code);
        buffer[code_size..code_size + data_slots].copy_from_slice(parts.data_metadata);
        if parts.layout == PackageLayout::Full {
            let n = parts.data_image.len().min(data_size);
            buffer[data_offset..data_offset + n].copy_from_slice(&parts.data_image[..n]);
        }

        Package {
            header: PackageHeader {
                code_size,
                metadata_size,
                data_slots,
                stack_slots: parts.stack_slots,
                padding,
                data_offset,
                data_size,
                stack_size,
                used_size,
                size,
                layout: parts.layout,
            },
            buffer,
        }
    }

    pub fn header(&self) -> &PackageHeader {
        &self.header
    }

    pub fn code(&self) -> &[u8] {
        &self.buffer[..self.header.code_size]
    }

    /// Initial metadata of every data and stack slot.
    pub fn metadata(&self) -> &[u8] {
        let start = self.header.metadata_offset();
        &self.buffer[start..start + self.header.metadata_size]
    }

    /// Initial data image, present for the `Full` layout only.
    pub fn data(&self) -> Option<&[u8]> {
        match self.header.layout {
            PackageLayout::Full => {
                let start = self.header.data_offset;
                Some(&self.buffer[start..start + self.header.data_size])
            }
            PackageLayout::CodeOnly => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Checks that the header describes the buffer, for packages that came
    /// from outside (deserialization).
    pub fn check(&self) -> Result<(), PackageError> {
        let h = &self.header;
        if self.buffer.len() != h.size.bytes() {
            return Err(PackageError::SizeMismatch {
                expected: h.size.bytes(),
                actual: self.buffer.len(),
            });
        }
        if h.metadata_size != h.data_slots + h.stack_slots {
            return Err(PackageError::InconsistentHeader("metadata size"));
        }
        if h.data_offset != h.code_size + h.metadata_size + h.padding
            || h.data_offset % SLOT_BYTES != 0
        {
            return Err(PackageError::InconsistentHeader("data offset"));
        }
        if h.data_size != h.data_slots * SLOT_BYTES || h.stack_size != h.stack_slots * SLOT_BYTES
        {
            return Err(PackageError::InconsistentHeader("region sizes"));
        }
        let used = match h.layout {
            PackageLayout::Full => h.data_offset + h.data_size + h.stack_size,
            PackageLayout::CodeOnly => h.data_offset,
        };
        if used != h.used_size || used > self.buffer.len() {
            return Err(PackageError::InconsistentHeader("used size"));
        }
        Ok(())
    }
}

// ============================================================================
// Packaging stage
// ============================================================================

/// Where the stack size of a package came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackSizeSource {
    ScriptDefine,
    OptionsDefine,
    Measured,
    StaticEstimate,
    Default,
}

fn parse_stack_define(value: &str) -> Result<usize, CompileErrorKind> {
    let invalid = || CompileErrorKind::InvalidDefine {
        key: STACK_SIZE_DEFINE.into(),
        value: value.into(),
    };
    let number: f32 = normalize_numeric_literal(value)
        .parse()
        .map_err(|_| invalid())?;
    if number < 0.0 || number.fract() != 0.0 {
        return Err(invalid());
    }
    Ok(number as usize)
}

fn assemble(state: &CompilationState<'_>, stack_slots: usize, options: &CompileOptions) -> Package {
    Package::assemble(PackageParts {
        code: &state.code,
        data_metadata: &state.data_metadata,
        data_image: &state.data_image,
        stack_slots,
        layout: options.layout,
        allocator: options.allocator,
    })
}

/// Decides the stack capacity, in slots, and where it came from.
fn resolve_stack_slots(
    state: &mut CompilationState<'_>,
) -> Result<(usize, StackSizeSource), CompileErrorKind> {
    let options = state.options;
    if let Some(value) = state.script_defines.get(STACK_SIZE_DEFINE) {
        return Ok((parse_stack_define(value)?, StackSizeSource::ScriptDefine));
    }
    if let Some(value) = options.defines.get(STACK_SIZE_DEFINE) {
        return Ok((parse_stack_define(value)?, StackSizeSource::OptionsDefine));
    }
    if !options.auto_estimate_stack_size {
        return Ok((options.default_stack_size, StackSizeSource::Default));
    }

    let provisional = assemble(state, MEASUREMENT_STACK_SLOTS, &options.with_full_layout());
    match run_validation(
        &provisional,
        &state.data_image,
        state.context,
        options.max_iterations,
        &[],
    ) {
        Ok(run) => {
            debug!(high_water = run.high_water, "Measured stack usage");
            Ok((run.high_water + 1, StackSizeSource::Measured))
        }
        Err(err) => {
            let estimate = state.static_stack_slots + 1;
            state.warn(
                None,
                format!(
                    "Stack measurement run did not complete ({}); using the static estimate of {} slots",
                    err, estimate
                ),
            );
            Ok((estimate, StackSizeSource::StaticEstimate))
        }
    }
}

pub fn package(state: &mut CompilationState<'_>) -> Result<(), CompileErrorKind> {
    let (stack_slots, source) = resolve_stack_slots(state)?;
    let options = state.options;
    trace!(stack_slots, ?source, "Resolved stack size");

    // Stack safety is checked against a full package even for code-only
    // output, since the check needs the data image in place.
    let full = assemble(state, stack_slots, &options.with_full_layout());
    match run_validation(
        &full,
        &state.data_image,
        state.context,
        options.max_iterations,
        &[],
    ) {
        Ok(run) if run.high_water >= stack_slots => {
            return Err(CompileErrorKind::StackTooSmall {
                high_water: run.high_water,
                capacity: stack_slots,
            });
        }
        Ok(run) => state.stack_high_water = Some(run.high_water),
        Err(VmError::StackTooSmall { needed, capacity }) => {
            return Err(CompileErrorKind::StackTooSmall {
                high_water: needed,
                capacity,
            });
        }
        Err(err) => {
            warn!(%err, "Stack safety could not be verified");
            state.warn(
                None,
                format!("Stack safety could not be verified: {}", err),
            );
        }
    }

    let package = match options.layout {
        PackageLayout::Full => full,
        PackageLayout::CodeOnly => assemble(state, stack_slots, options),
    };
    state.stack_source = Some(source);
    state.package = Some(package);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts<'a>(code: &'a [u8], meta: &'a [u8], data: &'a [u8]) -> PackageParts<'a> {
        PackageParts {
            code,
            data_metadata: meta,
            data_image: data,
            stack_slots: 2,
            layout: PackageLayout::Full,
            allocator: TargetAllocator::Pooled,
        }
    }

    #[test]
    fn smallest_fitting_tier_is_chosen() {
        assert_eq!(CapacityTier::fitting(1), Some(CapacityTier::B32));
        assert_eq!(CapacityTier::fitting(33), Some(CapacityTier::B64));
        assert_eq!(CapacityTier::fitting(960), Some(CapacityTier::B960));
        assert_eq!(CapacityTier::fitting(961), None);
    }

    #[test]
    fn regions_are_laid_out_in_order_with_aligned_data() {
        let code = [0x02, 0x80, 0x41, 0x0F, 0x00];
        let meta = [0x11];
        let data = 3.0f32.to_le_bytes();
        let package = Package::assemble(parts(&code, &meta, &data));
        let h = package.header();
        assert_eq!(h.code_size, 5);
        assert_eq!(h.metadata_size, 3);
        assert_eq!(h.padding, 0);
        assert_eq!(h.data_offset, 8);
        assert_eq!(h.data_offset % 4, 0);
        assert_eq!(h.used_size, 8 + 4 + 8);
        assert_eq!(h.size, PackageSize::Tier(CapacityTier::B32));
        assert_eq!(package.code(), &code);
        assert_eq!(package.metadata(), &[0x11, 0, 0]);
        assert_eq!(package.data(), Some(&data[..]));
        assert!(package.as_bytes()[h.data_offset + 4..].iter().all(|&b| b == 0));
        assert_eq!(package.check(), Ok(()));
    }

    #[test]
    fn exact_allocator_and_oversized_programs_skip_tiers() {
        let code = vec![0x01; 1000];
        let package = Package::assemble(parts(&code, &[], &[]));
        assert_eq!(package.header().size, PackageSize::Exact(1000 + 2 + 2 + 8));

        let mut exact = parts(&[0x00], &[], &[]);
        exact.allocator = TargetAllocator::Exact;
        let package = Package::assemble(exact);
        assert_eq!(package.header().size, PackageSize::Exact(package.header().used_size));
    }

    #[test]
    fn code_only_layout_omits_data() {
        let mut p = parts(&[0x00], &[0x11], &[0, 0, 0x40, 0x40]);
        p.layout = PackageLayout::CodeOnly;
        let package = Package::assemble(p);
        assert_eq!(package.data(), None);
        assert_eq!(package.header().used_size, package.header().data_offset);
    }

    #[test]
    fn tampered_headers_are_detected() {
        let mut package = Package::assemble(parts(&[0x00], &[0x11], &[0; 4]));
        package.header.data_size = 8;
        assert!(package.check().is_err());
    }

    #[test]
    fn stack_define_accepts_host_formatted_numbers() {
        assert_eq!(parse_stack_define("64"), Ok(64));
        assert_eq!(parse_stack_define("1_024"), Ok(1024));
        assert!(parse_stack_define("-3").is_err());
        assert!(parse_stack_define("lots").is_err());
    }
}
