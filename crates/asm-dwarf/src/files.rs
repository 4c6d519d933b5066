//! Source file table for the line-number program header.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::DwarfError;
use crate::leb128::write_uleb128;

/// Line-table file number. `0` is reserved and never assigned.
pub type FileIndex = u32;

/// One row of the file table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileEntry {
    /// File name as written in the header.
    pub name: String,
    /// Index into the directory table (0 = compilation directory).
    pub dir: u32,
}

/// Deduplicated, append-only registry of source file names.
///
/// # Examples
///
/// ```
/// use asm_dwarf::FileTable;
///
/// let mut files = FileTable::new();
/// let a = files.register("a.s")?;
/// let b = files.register("b.s")?;
/// assert_eq!((a, b), (1, 2));
/// assert_eq!(files.register("a.s")?, a);
/// # Ok::<(), asm_dwarf::DwarfError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileTable {
    /// Slot `i` holds file number `i`; slot 0 stays empty.
    entries: Vec<Option<FileEntry>>,
    /// Most recently resolved file number.
    last: Option<FileIndex>,
    max_files: usize,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    /// Create an empty table with the default slot limit.
    pub fn new() -> Self {
        Self::with_limit(crate::config::ResourceLimits::default().max_files)
    }

    /// Create an empty table holding at most `max_files` slots.
    pub fn with_limit(max_files: usize) -> Self {
        Self {
            entries: alloc::vec![None],
            last: None,
            max_files,
        }
    }

    /// Return the file number for `name`, assigning the smallest free one
    /// on first use.
    pub fn register(&mut self, name: &str) -> Result<FileIndex, DwarfError> {
        if name.is_empty() {
            return Err(DwarfError::invalid("empty file name"));
        }
        if let Some(idx) = self.last {
            if self.name_at(idx) == Some(name) {
                return Ok(idx);
            }
        }
        if let Some(idx) = self.lookup(name) {
            self.last = Some(idx);
            return Ok(idx);
        }

        let slot = self
            .entries
            .iter()
            .skip(1)
            .position(Option::is_none)
            .map_or(self.entries.len(), |p| p + 1);
        self.check_limit(slot)?;
        if slot == self.entries.len() {
            self.entries.push(None);
        }
        self.entries[slot] = Some(FileEntry {
            name: String::from(name),
            dir: 0,
        });
        let idx = slot as FileIndex;
        self.last = Some(idx);
        tracing::trace!(index = idx, name, "file registered");
        Ok(idx)
    }

    /// Place `name` at an explicit file number (`.file N "name"`).
    ///
    /// Re-registering the same name in the same slot is a no-op; a different
    /// name fails with [`DwarfError::DuplicateFile`].
    pub fn register_explicit(&mut self, index: FileIndex, name: &str) -> Result<(), DwarfError> {
        if index == 0 {
            return Err(DwarfError::invalid("file number 0 is reserved"));
        }
        if name.is_empty() {
            return Err(DwarfError::invalid("empty file name"));
        }
        let slot = index as usize;
        self.check_limit(slot)?;
        if slot >= self.entries.len() {
            self.entries.resize(slot + 1, None);
        }

        match &self.entries[slot] {
            Some(existing) if existing.name == name => {}
            Some(existing) => {
                return Err(DwarfError::DuplicateFile {
                    index,
                    existing: existing.name.clone(),
                    name: String::from(name),
                });
            }
            None => {
                self.entries[slot] = Some(FileEntry {
                    name: String::from(name),
                    dir: 0,
                });
            }
        }
        self.last = Some(index);
        Ok(())
    }

    /// Look up a name without registering it.
    pub fn lookup(&self, name: &str) -> Option<FileIndex> {
        self.entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.name == name))
            .map(|p| p as FileIndex)
    }

    /// Entry at `index`, if assigned.
    pub fn get(&self, index: FileIndex) -> Option<&FileEntry> {
        self.entries.get(index as usize).and_then(Option::as_ref)
    }

    fn name_at(&self, index: FileIndex) -> Option<&str> {
        self.get(index).map(|e| e.name.as_str())
    }

    /// Highest file number in use (0 when empty).
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    /// Whether no file number has been used.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assigned entries in ascending file-number order.
    pub fn iter(&self) -> impl Iterator<Item = (FileIndex, &FileEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i as FileIndex, e)))
    }

    /// Write the directory and file tables of the line-program header.
    ///
    /// Unnamed slots below the highest assigned number are reported into
    /// `diagnostics` and skipped.
    pub fn emit(&self, out: &mut Vec<u8>, diagnostics: &mut Vec<DwarfError>) {
        // Directory table: only the implicit compilation directory.
        out.push(0);

        for (i, entry) in self.entries.iter().enumerate().skip(1) {
            match entry {
                Some(entry) => {
                    out.extend_from_slice(entry.name.as_bytes());
                    out.push(0);
                    write_uleb128(out, u64::from(entry.dir));
                    write_uleb128(out, 0); // mtime
                    write_uleb128(out, 0); // length
                }
                None => {
                    tracing::warn!(index = i, "unassigned file number");
                    diagnostics.push(DwarfError::UnassignedFileNumber {
                        index: i as FileIndex,
                    });
                }
            }
        }

        out.push(0);
    }

    fn check_limit(&self, slot: usize) -> Result<(), DwarfError> {
        if slot > self.max_files {
            return Err(DwarfError::ResourceLimitExceeded {
                resource: String::from("files"),
                limit: self.max_files,
            });
        }
        Ok(())
    }
}
