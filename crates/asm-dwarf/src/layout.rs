//! Fragment layout with deferred-size relaxation.
//!
//! A [`Layout`] holds named sections, each an ordered list of fragments:
//! fixed bytes (optionally carrying relocations), alignment padding, `.org`
//! gaps, and [`Relax`] variants whose size is only known once the addresses
//! they depend on have settled.  [`Layout::resolve`] runs the relaxation
//! fixpoint over every variant in every section, then writes the final bytes
//! and patches relocations.
//!
//! Allocated sections are placed one after another from the base address;
//! debug sections are non-allocated and each start at offset 0.

use alloc::boxed::Box;
use alloc::string::String;
#[allow(unused_imports)]
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::error::DwarfError;

/// Default maximum number of relaxation passes.
const MAX_RELAXATION_PASSES: usize = 100;

// ─── Addressing ────────────────────────────────────────────

/// Handle of a section inside a [`Layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectionId(pub usize);

/// A location inside emitted output: fragment handle plus byte offset.
///
/// Positions stay valid for the lifetime of the layout because fragments are
/// only ever appended.  A fragment index equal to the section's fragment
/// count denotes the end of the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    /// Owning section.
    pub section: SectionId,
    /// Fragment index within the section.
    pub fragment: usize,
    /// Byte offset from the start of the fragment.
    pub offset: u64,
}

impl Position {
    /// Create a position.
    #[must_use]
    pub fn new(section: SectionId, fragment: usize, offset: u64) -> Self {
        Self {
            section,
            fragment,
            offset,
        }
    }

    /// Whether `other` lies in the same fragment, so the distance between
    /// the two is already fixed.
    #[must_use]
    pub fn same_fragment(&self, other: &Position) -> bool {
        self.section == other.section && self.fragment == other.fragment
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}+{}", self.section.0, self.fragment, self.offset)
    }
}

/// Maps positions to addresses.
///
/// During relaxation only [`Resolve::guess`] is meaningful; [`Resolve::resolve`]
/// returns `None` until layout has converged.
pub trait Resolve {
    /// Current best estimate of the address of `pos`.
    fn guess(&self, pos: Position) -> Option<u64>;
    /// Final address of `pos`, once layout is final.
    fn resolve(&self, pos: Position) -> Option<u64>;
}

/// A deferred-size fragment driven by the layout fixpoint.
///
/// The layout calls [`Relax::estimate`] once before the first pass,
/// [`Relax::relax`] once per pass until every variant reports `0`, and
/// [`Relax::finalize`] exactly once after convergence.
pub trait Relax: fmt::Debug {
    /// Compute and record a working size from the current address guesses.
    fn estimate(&mut self, layout: &dyn Resolve) -> usize;
    /// Re-estimate and return the change in working size.
    fn relax(&mut self, layout: &dyn Resolve) -> isize;
    /// Write the final bytes using resolved addresses.
    fn finalize(&mut self, layout: &dyn Resolve, out: &mut Vec<u8>) -> Result<(), DwarfError>;
    /// The most recently recorded working size.
    fn size(&self) -> usize;
}

/// Address snapshot of every fragment boundary.
#[derive(Debug, Clone, Default)]
pub struct AddressMap {
    /// `sections[s][f]` is the address of fragment `f`; the last element is
    /// the end of the section.
    sections: Vec<Vec<u64>>,
    converged: bool,
}

impl AddressMap {
    fn lookup(&self, pos: Position) -> Option<u64> {
        let offsets = self.sections.get(pos.section.0)?;
        let base = *offsets.get(pos.fragment)?;
        base.checked_add(pos.offset)
    }

    /// Start address of a section.
    pub fn section_start(&self, id: SectionId) -> Option<u64> {
        self.sections.get(id.0).and_then(|o| o.first().copied())
    }

    /// End address of a section.
    pub fn section_end(&self, id: SectionId) -> Option<u64> {
        self.sections.get(id.0).and_then(|o| o.last().copied())
    }
}

impl Resolve for AddressMap {
    fn guess(&self, pos: Position) -> Option<u64> {
        self.lookup(pos)
    }

    fn resolve(&self, pos: Position) -> Option<u64> {
        if self.converged {
            self.lookup(pos)
        } else {
            None
        }
    }
}

// ─── Relocations ───────────────────────────────────────────

/// What a relocation writes once addresses are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocTarget {
    /// The address of a position.
    Address(Position),
    /// The distance `to - from`.
    Distance {
        /// Start of the range.
        from: Position,
        /// End of the range.
        to: Position,
    },
}

/// A value patched into fixed bytes after layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Byte offset within the fragment.
    pub offset: usize,
    /// Field width in bytes (1, 2, 4, or 8), little-endian.
    pub size: u8,
    /// The value to write.
    pub target: RelocTarget,
    /// Added to the resolved value.
    pub addend: i64,
}

impl Relocation {
    /// Address relocation at `offset`.
    #[must_use]
    pub fn address(offset: usize, size: u8, target: Position) -> Self {
        Self {
            offset,
            size,
            target: RelocTarget::Address(target),
            addend: 0,
        }
    }

    /// Distance relocation at `offset`.
    #[must_use]
    pub fn distance(offset: usize, size: u8, from: Position, to: Position) -> Self {
        Self {
            offset,
            size,
            target: RelocTarget::Distance { from, to },
            addend: 0,
        }
    }
}

// ─── Fragment ──────────────────────────────────────────────

/// A fragment of section output.
#[derive(Debug)]
pub enum Fragment {
    /// Fixed-size bytes with relocations applied after layout.
    Fixed {
        /// The raw bytes.
        bytes: Vec<u8>,
        /// Relocations into `bytes`.
        relocations: Vec<Relocation>,
    },
    /// Alignment padding; its size depends on the preceding layout.
    Align {
        /// Required byte alignment (must be a power of two).
        alignment: u32,
        /// Byte value used for padding.
        fill: u8,
        /// If set, skip this alignment entirely when the required padding
        /// exceeds this many bytes.
        max_skip: Option<u32>,
    },
    /// Advance to a section-relative offset, padding with `fill`.
    Org {
        /// Section-relative target offset.
        target: u64,
        /// Byte value used to fill the gap.
        fill: u8,
    },
    /// A deferred-size record.
    Variant(Box<dyn Relax>),
}

impl Fragment {
    fn fixed() -> Self {
        Fragment::Fixed {
            bytes: Vec::new(),
            relocations: Vec::new(),
        }
    }
}

/// Section classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SectionKind {
    /// Executable code; gets a line-number sequence.
    Code,
    /// Allocated data.
    Data,
    /// Non-allocated debug information.
    Debug,
}

impl SectionKind {
    /// Whether the section occupies target address space.
    #[must_use]
    pub fn is_alloc(self) -> bool {
        !matches!(self, SectionKind::Debug)
    }
}

#[derive(Debug)]
struct Section {
    name: String,
    kind: SectionKind,
    alignment: u32,
    fragments: Vec<Fragment>,
}

/// A section after layout.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectionImage {
    /// Section name.
    pub name: String,
    /// Section classification.
    pub kind: SectionKind,
    /// Start address (0 for debug sections).
    pub address: u64,
    /// Final contents.
    pub bytes: Vec<u8>,
}

/// All sections after layout, in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[must_use]
pub struct Image {
    sections: Vec<SectionImage>,
}

impl Image {
    /// All sections.
    pub fn sections(&self) -> &[SectionImage] {
        &self.sections
    }

    /// Look up a section by name.
    pub fn section(&self, name: &str) -> Option<&SectionImage> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Contents of the named section, or an empty slice.
    pub fn bytes(&self, name: &str) -> &[u8] {
        self.section(name).map_or(&[], |s| s.bytes.as_slice())
    }

    /// Consume and return the sections.
    pub fn into_sections(self) -> Vec<SectionImage> {
        self.sections
    }
}

// ─── Public API ────────────────────────────────────────────

/// The layout engine: collects sections and fragments, resolves everything.
#[derive(Debug)]
pub struct Layout {
    sections: Vec<Section>,
    base_address: u64,
    max_passes: usize,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new()
    }
}

impl Layout {
    /// Create an empty layout with base address 0.
    pub fn new() -> Self {
        Self {
            sections: Vec::new(),
            base_address: 0,
            max_passes: MAX_RELAXATION_PASSES,
        }
    }

    /// Set the address of the first allocated section.
    pub fn set_base_address(&mut self, addr: u64) {
        self.base_address = addr;
    }

    /// The base address.
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Limit the number of relaxation passes.
    pub fn set_max_passes(&mut self, max: usize) {
        self.max_passes = max;
    }

    /// Create a section, or return the existing one with the same name.
    pub fn add_section(&mut self, name: &str, kind: SectionKind) -> SectionId {
        if let Some(id) = self.section_by_name(name) {
            return id;
        }
        self.sections.push(Section {
            name: String::from(name),
            kind,
            alignment: 1,
            fragments: Vec::new(),
        });
        SectionId(self.sections.len() - 1)
    }

    /// Find a section by name.
    pub fn section_by_name(&self, name: &str) -> Option<SectionId> {
        self.sections
            .iter()
            .position(|s| s.name == name)
            .map(SectionId)
    }

    /// All section handles in creation order.
    pub fn section_ids(&self) -> impl Iterator<Item = SectionId> {
        (0..self.sections.len()).map(SectionId)
    }

    /// Name of a section.
    pub fn section_name(&self, id: SectionId) -> &str {
        &self.sections[id.0].name
    }

    /// Kind of a section.
    pub fn section_kind(&self, id: SectionId) -> SectionKind {
        self.sections[id.0].kind
    }

    /// Set the start alignment of an allocated section.
    pub fn set_section_alignment(&mut self, id: SectionId, alignment: u32) {
        self.sections[id.0].alignment = alignment.max(1);
    }

    /// Number of fragments in a section.
    pub fn fragment_count(&self, id: SectionId) -> usize {
        self.sections[id.0].fragments.len()
    }

    /// Position of the next byte appended to `id`.
    ///
    /// Opens a fixed fragment if the section does not end with one.
    pub fn here(&mut self, id: SectionId) -> Position {
        let frags = &mut self.sections[id.0].fragments;
        if !matches!(frags.last(), Some(Fragment::Fixed { .. })) {
            frags.push(Fragment::fixed());
        }
        let index = frags.len() - 1;
        let len = match &frags[index] {
            Fragment::Fixed { bytes, .. } => bytes.len() as u64,
            _ => 0,
        };
        Position::new(id, index, len)
    }

    /// Start of a section.
    pub fn start_of(&self, id: SectionId) -> Position {
        Position::new(id, 0, 0)
    }

    /// End of a section as it stands now.
    ///
    /// When the section ends with fixed bytes the position lies inside that
    /// fragment, so distances from earlier positions in it are already known.
    pub fn end_of(&self, id: SectionId) -> Position {
        let frags = &self.sections[id.0].fragments;
        match frags.last() {
            Some(Fragment::Fixed { bytes, .. }) => {
                Position::new(id, frags.len() - 1, bytes.len() as u64)
            }
            _ => Position::new(id, frags.len(), 0),
        }
    }

    /// Append fixed bytes, returning the position of the first one.
    pub fn append(&mut self, id: SectionId, data: &[u8]) -> Position {
        self.append_with_relocations(id, data, &[])
    }

    /// Append fixed bytes whose relocation offsets are relative to `data`.
    pub fn append_with_relocations(
        &mut self,
        id: SectionId,
        data: &[u8],
        relocs: &[Relocation],
    ) -> Position {
        let pos = self.here(id);
        if let Some(Fragment::Fixed { bytes, relocations }) =
            self.sections[id.0].fragments.last_mut()
        {
            let base = bytes.len();
            bytes.extend_from_slice(data);
            relocations.extend(relocs.iter().map(|r| Relocation {
                offset: r.offset + base,
                ..*r
            }));
        }
        pos
    }

    /// Attach a relocation to bytes already written at `at`.
    ///
    /// # Errors
    ///
    /// [`DwarfError::InvalidParameter`] if `at` is not inside a fixed
    /// fragment with room for the field.
    pub fn relocate(&mut self, at: Position, size: u8, target: RelocTarget) -> Result<(), DwarfError> {
        let frag = self
            .sections
            .get_mut(at.section.0)
            .and_then(|s| s.fragments.get_mut(at.fragment));
        match frag {
            Some(Fragment::Fixed { bytes, relocations })
                if at.offset as usize + usize::from(size) <= bytes.len() =>
            {
                relocations.push(Relocation {
                    offset: at.offset as usize,
                    size,
                    target,
                    addend: 0,
                });
                Ok(())
            }
            _ => Err(DwarfError::invalid(alloc::format!(
                "no {size}-byte fixed field at {at}"
            ))),
        }
    }

    /// Close the current fixed fragment so the next bytes start a new one.
    pub fn new_fragment(&mut self, id: SectionId) {
        self.sections[id.0].fragments.push(Fragment::fixed());
    }

    /// Add alignment padding.
    pub fn add_alignment(&mut self, id: SectionId, alignment: u32, fill: u8, max_skip: Option<u32>) {
        self.sections[id.0].fragments.push(Fragment::Align {
            alignment,
            fill,
            max_skip,
        });
    }

    /// Add an `.org` gap to a section-relative offset.
    pub fn add_org(&mut self, id: SectionId, target: u64, fill: u8) {
        self.sections[id.0]
            .fragments
            .push(Fragment::Org { target, fill });
    }

    /// Register a deferred-size record at the end of a section.
    pub fn add_variant(&mut self, id: SectionId, variant: Box<dyn Relax>) -> Position {
        let frags = &mut self.sections[id.0].fragments;
        frags.push(Fragment::Variant(variant));
        Position::new(id, frags.len() - 1, 0)
    }

    // ── resolve ────────────────────────────────────────────

    /// Run relaxation to a fixpoint, then emit every section.
    ///
    /// # Errors
    ///
    /// [`DwarfError::RelaxationLimit`] if variants keep changing size,
    /// [`DwarfError::OrgBehind`] for a backwards `.org`, relocation errors,
    /// and any error a variant reports from [`Relax::finalize`].
    pub fn resolve(mut self) -> Result<Image, DwarfError> {
        // Phase 1: relaxation fixpoint
        let map = self.relax()?;

        // Phase 2: emit final bytes with patched relocations
        self.emit_final(&map)
    }

    /// Iterate until no variant changes size.  Returns the converged map.
    fn relax(&mut self) -> Result<AddressMap, DwarfError> {
        let map = self.compute_addresses();
        for frag in self.variants_mut() {
            frag.estimate(&map);
        }

        for pass in 0..self.max_passes {
            let map = self.compute_addresses();
            let mut changed = 0usize;
            for frag in self.variants_mut() {
                if frag.relax(&map) != 0 {
                    changed += 1;
                }
            }
            tracing::trace!(pass, changed, "relaxation pass");
            if changed == 0 {
                tracing::debug!(passes = pass + 1, "layout converged");
                return Ok(AddressMap {
                    converged: true,
                    ..map
                });
            }
        }

        Err(DwarfError::RelaxationLimit {
            max: self.max_passes,
        })
    }

    fn variants_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Relax>> {
        self.sections
            .iter_mut()
            .flat_map(|s| s.fragments.iter_mut())
            .filter_map(|f| match f {
                Fragment::Variant(v) => Some(v),
                _ => None,
            })
    }

    // ── address computation ────────────────────────────────

    /// Snapshot of every fragment address with current variant sizes.
    fn compute_addresses(&self) -> AddressMap {
        let mut next_alloc = self.base_address;
        let mut sections = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            let start = if section.kind.is_alloc() {
                let a = u64::from(section.alignment);
                next_alloc.div_ceil(a) * a
            } else {
                0
            };
            let offsets = section_offsets(section, start);
            if section.kind.is_alloc() {
                next_alloc = offsets.last().copied().unwrap_or(start);
            }
            sections.push(offsets);
        }
        AddressMap {
            sections,
            converged: false,
        }
    }

    // ── final emit ─────────────────────────────────────────

    fn emit_final(&mut self, map: &AddressMap) -> Result<Image, DwarfError> {
        let mut images = Vec::with_capacity(self.sections.len());

        for (s, section) in self.sections.iter_mut().enumerate() {
            let offsets = &map.sections[s];
            let start = offsets[0];
            let total = offsets.last().copied().unwrap_or(start) - start;
            let mut output = Vec::with_capacity(total as usize);

            for (i, frag) in section.fragments.iter_mut().enumerate() {
                match frag {
                    Fragment::Fixed { bytes, relocations } => {
                        for reloc in relocations.iter() {
                            apply_relocation(bytes, reloc, map)?;
                        }
                        output.extend_from_slice(bytes);
                    }
                    Fragment::Align {
                        alignment,
                        fill,
                        max_skip,
                    } => {
                        let padding = align_padding(offsets[i], *alignment, *max_skip);
                        output.extend(core::iter::repeat(*fill).take(padding as usize));
                    }
                    Fragment::Org { target, fill } => {
                        let current = offsets[i];
                        let absolute = start + *target;
                        if absolute < current {
                            return Err(DwarfError::OrgBehind {
                                target: absolute,
                                current,
                            });
                        }
                        output.extend(core::iter::repeat(*fill).take((absolute - current) as usize));
                    }
                    Fragment::Variant(v) => {
                        v.finalize(map, &mut output)?;
                    }
                }
            }
            debug_assert_eq!(output.len() as u64, total);

            images.push(SectionImage {
                name: section.name.clone(),
                kind: section.kind,
                address: start,
                bytes: output,
            });
        }

        Ok(Image { sections: images })
    }
}

/// Fragment boundary addresses for one section starting at `start`.
fn section_offsets(section: &Section, start: u64) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(section.fragments.len() + 1);
    let mut current = start;
    for frag in &section.fragments {
        offsets.push(current);
        match frag {
            Fragment::Fixed { bytes, .. } => current += bytes.len() as u64,
            Fragment::Align {
                alignment,
                max_skip,
                ..
            } => current += align_padding(current, *alignment, *max_skip),
            Fragment::Org { target, .. } => {
                // A backwards target is reported at emit time.
                current = current.max(start + *target);
            }
            Fragment::Variant(v) => current += v.size() as u64,
        }
    }
    offsets.push(current);
    offsets
}

fn align_padding(current: u64, alignment: u32, max_skip: Option<u32>) -> u64 {
    let a = u64::from(alignment);
    if a <= 1 {
        return 0;
    }
    let padding = current.div_ceil(a) * a - current;
    if max_skip.is_some_and(|ms| padding > u64::from(ms)) {
        0
    } else {
        padding
    }
}

// ─── relocation patching ───────────────────────────────────

fn apply_relocation(bytes: &mut [u8], reloc: &Relocation, map: &AddressMap) -> Result<(), DwarfError> {
    let resolve = |pos: Position| {
        map.resolve(pos)
            .ok_or(DwarfError::UnresolvedPosition { position: pos })
    };
    let value = match reloc.target {
        RelocTarget::Address(pos) => i128::from(resolve(pos)?),
        RelocTarget::Distance { from, to } => i128::from(resolve(to)?) - i128::from(resolve(from)?),
    } + i128::from(reloc.addend);

    let size = usize::from(reloc.size);
    let fits = match reloc.size {
        1 | 2 | 4 => (0..1i128 << (8 * size)).contains(&value),
        8 => (0..=i128::from(u64::MAX)).contains(&value),
        _ => false,
    };
    if !fits || reloc.offset + size > bytes.len() {
        return Err(DwarfError::RelocationOverflow {
            value: value as u64,
            size: reloc.size,
        });
    }
    let le = (value as u64).to_le_bytes();
    bytes[reloc.offset..reloc.offset + size].copy_from_slice(&le[..size]);
    Ok(())
}
