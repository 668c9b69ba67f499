use crate::address::CellKey;
use crate::model::{CellSnapshot, DiffHunk, DiffKind, WorkbookSnapshot};
use crate::styles::{self, StyleDescriptor};
use lru::LruCache;
use smallvec::SmallVec;
use std::num::NonZeroUsize;
use tracing::warn;

pub const DEFAULT_MAX_DIFFS: usize = 500;

/// Keys processed between yield points in the chunked variant.
const CHUNK_KEYS: usize = 256;

const STYLE_CACHE_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy)]
pub struct DiffOptions {
    /// Hard cap on emitted hunks; bounds downstream UI and host cost.
    pub max_diffs: usize,
    pub include_styles: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            max_diffs: DEFAULT_MAX_DIFFS,
            include_styles: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiffOutcome {
    pub hunks: Vec<DiffHunk>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Formula,
    Value,
    Style,
}

/// Compute ordered hunks between two snapshots.
///
/// Keys are the sorted union of both maps, so output is deterministic for a
/// given input pair regardless of map iteration order.
pub fn diff_snapshots(
    before: &WorkbookSnapshot,
    after: &WorkbookSnapshot,
    opts: &DiffOptions,
) -> DiffOutcome {
    let keys = union_keys(before, after);
    let mut ctx = DiffContext::new(*opts);
    ctx.scan(&keys, before, after);
    ctx.finish()
}

/// Chunked variant: identical output to [`diff_snapshots`] for the same
/// inputs; yields to the scheduler between fixed-size key slices so large
/// diffs do not starve the single-threaded executor.
pub async fn diff_snapshots_chunked(
    before: &WorkbookSnapshot,
    after: &WorkbookSnapshot,
    opts: &DiffOptions,
) -> DiffOutcome {
    let keys = union_keys(before, after);
    let mut ctx = DiffContext::new(*opts);
    for slice in keys.chunks(CHUNK_KEYS) {
        if ctx.scan(slice, before, after) {
            break;
        }
        tokio::task::yield_now().await;
    }
    ctx.finish()
}

fn union_keys<'a>(before: &'a WorkbookSnapshot, after: &'a WorkbookSnapshot) -> Vec<&'a String> {
    let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

struct DiffContext {
    opts: DiffOptions,
    hunks: Vec<DiffHunk>,
    truncated: bool,
    style_cache: LruCache<String, StyleDescriptor>,
}

impl DiffContext {
    fn new(opts: DiffOptions) -> Self {
        let capacity = NonZeroUsize::new(STYLE_CACHE_CAPACITY).unwrap();
        Self {
            opts,
            hunks: Vec::new(),
            truncated: false,
            style_cache: LruCache::new(capacity),
        }
    }

    /// Classify a slice of keys. Returns true once the cap is hit.
    fn scan(
        &mut self,
        keys: &[&String],
        before: &WorkbookSnapshot,
        after: &WorkbookSnapshot,
    ) -> bool {
        for &key in keys {
            if self.hunks.len() >= self.opts.max_diffs {
                self.truncated = true;
                return true;
            }
            let cell_key = match CellKey::parse(key) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!("skipping malformed snapshot key '{key}': {err}");
                    continue;
                }
            };
            if let Some(hunk) = self.classify(cell_key, before.get(key), after.get(key)) {
                self.hunks.push(hunk);
            }
        }
        false
    }

    fn classify(
        &mut self,
        key: CellKey,
        before: Option<&CellSnapshot>,
        after: Option<&CellSnapshot>,
    ) -> Option<DiffHunk> {
        match (before, after) {
            (None, None) => None,
            (None, Some(after)) => Some(DiffHunk {
                key,
                kind: DiffKind::Added,
                before: None,
                after: Some(after.clone()),
            }),
            (Some(before), None) => Some(DiffHunk {
                key,
                kind: DiffKind::Deleted,
                before: Some(before.clone()),
                after: None,
            }),
            (Some(before), Some(after)) => {
                let mut changed: SmallVec<[Dimension; 3]> = SmallVec::new();
                if before.formula != after.formula {
                    changed.push(Dimension::Formula);
                }
                if before.value != after.value {
                    changed.push(Dimension::Value);
                }
                if self.opts.include_styles
                    && (!self.styles_equal(before.style.as_deref(), after.style.as_deref())
                        || before.merge != after.merge)
                {
                    changed.push(Dimension::Style);
                }

                // Precedence: formula > value > style.
                let kind = if changed.contains(&Dimension::Formula) {
                    DiffKind::FormulaChanged
                } else if changed.contains(&Dimension::Value) {
                    DiffKind::ValueChanged
                } else if changed.contains(&Dimension::Style) {
                    DiffKind::StyleChanged
                } else {
                    return None;
                };

                Some(DiffHunk {
                    key,
                    kind,
                    before: Some(before.clone()),
                    after: Some(after.clone()),
                })
            }
        }
    }

    /// Deep style equality: byte-equal serialized forms short-circuit, then
    /// parsed descriptors are compared so key ordering differences in the
    /// serialized JSON do not register as changes.
    fn styles_equal(&mut self, before: Option<&str>, after: Option<&str>) -> bool {
        match (before, after) {
            (None, None) => true,
            (Some(a), Some(b)) if a == b => true,
            (Some(a), Some(b)) => {
                let parsed_a = self.parse_cached(a);
                let parsed_b = self.parse_cached(b);
                parsed_a == parsed_b
            }
            _ => false,
        }
    }

    fn parse_cached(&mut self, raw: &str) -> StyleDescriptor {
        if let Some(found) = self.style_cache.get(raw) {
            return found.clone();
        }
        let parsed = styles::parse_style(raw).unwrap_or_else(|err| {
            warn!("treating unparsable style as empty during diff: {err:#}");
            StyleDescriptor::default()
        });
        self.style_cache.put(raw.to_string(), parsed.clone());
        parsed
    }

    fn finish(self) -> DiffOutcome {
        if self.truncated {
            warn!(
                emitted = self.hunks.len(),
                max = self.opts.max_diffs,
                "diff truncated at cap"
            );
        }
        DiffOutcome {
            hunks: self.hunks,
            truncated: self.truncated,
        }
    }
}
