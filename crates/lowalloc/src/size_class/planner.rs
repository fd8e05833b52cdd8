use super::{check, SizeMap, MAX_SIZE_CLASSES};
use crate::config::{self, DEFAULT_TRANSFER_NUM_OBJECTS};
use crate::util::lg_floor;

/// Objects moved per batch are chosen so a batch is roughly this many bytes.
const TARGET_TRANSFER_BYTES: usize = 64 * 1024;

/// Inputs to size-class planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Granularity of small sizes and of the index table.
    pub alignment: usize,
    /// Alignment every size from this value up to 128 bytes must honor.
    pub min_align: usize,
    /// Largest size indexed at `alignment` granularity.
    pub max_small_size: usize,
    /// Largest size served by a size class.
    pub max_size: usize,
    /// log2 of the logical page size.
    pub page_shift: u32,
    /// Page size of the host; spans are whole multiples of it.
    pub native_page_size: usize,
    /// Cap on objects moved per batch transfer.
    pub transfer_num_objects: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            alignment: super::DEFAULT_ALIGNMENT,
            min_align: super::DEFAULT_MIN_ALIGN,
            max_small_size: super::DEFAULT_MAX_SMALL_SIZE,
            max_size: super::DEFAULT_MAX_SIZE,
            page_shift: super::DEFAULT_PAGE_SHIFT,
            native_page_size: crate::util::page_size(),
            transfer_num_objects: DEFAULT_TRANSFER_NUM_OBJECTS,
        }
    }
}

impl PlannerConfig {
    /// Defaults with the environment overrides applied.
    pub fn from_env() -> Self {
        let overrides = config::overrides();
        let mut cfg = PlannerConfig::default();
        if let Some(n) = overrides.transfer_num_objects {
            cfg.transfer_num_objects = n;
        }
        if let Some(ps) = overrides.page_size {
            cfg.native_page_size = ps;
        }
        cfg
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        1 << self.page_shift
    }

    fn validate(&self) -> Result<(), PlanError> {
        if !self.alignment.is_power_of_two() || !self.min_align.is_power_of_two() {
            return Err(PlanError::InvalidConfig("alignments must be powers of two"));
        }
        if self.alignment > self.min_align {
            return Err(PlanError::InvalidConfig("alignment exceeds min_align"));
        }
        if self.min_align > 128 {
            return Err(PlanError::InvalidConfig("min_align above 128"));
        }
        if self.max_small_size < 128 || self.max_small_size % 128 != 0 {
            return Err(PlanError::InvalidConfig("max_small_size must be a multiple of 128"));
        }
        if self.max_size < self.max_small_size {
            return Err(PlanError::InvalidConfig("max_size below max_small_size"));
        }
        if !(10..=20).contains(&self.page_shift) {
            return Err(PlanError::InvalidConfig("page_shift out of range"));
        }
        if self.native_page_size == 0 {
            return Err(PlanError::InvalidConfig("native page size is zero"));
        }
        if self.transfer_num_objects == 0 {
            return Err(PlanError::InvalidConfig("transfer_num_objects is zero"));
        }
        Ok(())
    }

    /// Alignment a class of `size` bytes must have.
    fn alignment_for_size(&self, size: usize) -> usize {
        let page_size = self.page_size();
        let alignment = if size > self.max_size {
            page_size
        } else if size >= 128 {
            // Space wasted due to alignment is at most 1/8, i.e., 12.5%.
            (1 << lg_floor(size)) / 8
        } else if size >= self.min_align {
            self.min_align
        } else {
            self.alignment
        };
        let alignment = alignment.min(page_size);
        debug_assert!(size < self.min_align || alignment >= self.min_align);
        alignment
    }

    /// Objects moved per batch transfer for `size`-byte objects.
    pub fn num_move_size(&self, size: usize) -> usize {
        if size == 0 {
            return 0;
        }
        (TARGET_TRANSFER_BYTES / size)
            .max(2)
            .min(self.transfer_num_objects)
    }

    /// Smallest span granularity: the native page, unless it does not tile
    /// the logical page.
    fn min_span_size(&self) -> usize {
        let page_size = self.page_size();
        let min_span = self.native_page_size.max(page_size);
        if min_span > page_size && min_span % page_size != 0 {
            log::warn!(
                "native page size {} is not a multiple of the {}-byte logical page; \
                 spans fall back to logical pages",
                self.native_page_size,
                page_size
            );
            return page_size;
        }
        min_span
    }
}

/// A size-class table that cannot be trusted. Any of these is fatal at
/// process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("invalid planner configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("class index {index} for size {size} is outside the {capacity}-entry index table")]
    ClassIndexOutOfRange {
        size: usize,
        index: usize,
        capacity: usize,
    },
    #[error("too many size classes (found {found}, max {max})")]
    TooManyClasses { found: usize, max: usize },
    #[error("candidate size {size} is not a multiple of its alignment {alignment}")]
    Misaligned { size: usize, alignment: usize },
    #[error("bad size class {class} for size {size}")]
    BadClass { class: usize, size: usize },
    #[error("allocating unnecessarily large class {class} for size {size}")]
    UnnecessarilyLarge { class: usize, size: usize },
    #[error("class {class} of {class_size} bytes cannot hold size {size}")]
    SizeNotCovered {
        class: usize,
        class_size: usize,
        size: usize,
    },
    #[error("class {class} breaks table ordering")]
    NotMonotonic { class: usize },
    #[error("size {size} maps to class size {class_size}, not a multiple of {align}")]
    AlignmentBroken {
        align: usize,
        size: usize,
        class_size: usize,
    },
}

/// Grow a span until leftover space is at most 1/8 of it and it holds at
/// least `min_objects` objects of `size` bytes.
fn span_bytes(size: usize, min_span: usize, min_objects: usize) -> usize {
    let mut psize = 0;
    loop {
        psize += min_span;
        while psize % size > psize >> 3 {
            psize += min_span;
        }
        if psize / size >= min_objects {
            return psize;
        }
    }
}

impl SizeMap {
    /// Compute the size-class table for `config` and run the self-checks.
    pub fn plan(config: &PlannerConfig) -> Result<SizeMap, PlanError> {
        config.validate()?;
        let mut map = SizeMap::empty(config);
        check::verify_index_bounds(&map)?;

        let min_span = config.min_span_size();
        let page_shift = config.page_shift;

        let mut sc = 1;
        // Sizes below min_align fold into the first class.
        let mut size = config.alignment.max(config.min_align);
        while size <= config.max_size {
            let alignment = config.alignment_for_size(size);
            if size % alignment != 0 {
                return Err(PlanError::Misaligned { size, alignment });
            }

            let blocks_to_move = config.num_move_size(size) / 4;
            let pages = span_bytes(size, min_span, blocks_to_move) >> page_shift;

            if sc > 1 && pages == map.class_to_pages[sc - 1] {
                // Merge into the previous class if that does not change how
                // many objects a span holds.
                let objects = (pages << page_shift) / size;
                let prev_objects =
                    (map.class_to_pages[sc - 1] << page_shift) / map.class_to_size[sc - 1];
                if objects == prev_objects {
                    map.class_to_size[sc - 1] = size;
                    size += alignment;
                    continue;
                }
            }

            if sc >= MAX_SIZE_CLASSES {
                return Err(PlanError::TooManyClasses {
                    found: sc + 1,
                    max: MAX_SIZE_CLASSES,
                });
            }
            map.class_to_pages[sc] = pages;
            map.class_to_size[sc] = size;
            sc += 1;
            size += alignment;
        }
        map.num_classes = sc - 1;

        map.widen_shrinking_spans(min_span);
        map.fill_class_array(config.alignment);
        for cl in 1..=map.num_classes {
            map.num_objects_to_move[cl] = config.num_move_size(map.class_to_size[cl]);
        }

        check::verify(&map)?;

        log::info!(
            "planned {} size classes up to {} bytes ({}-byte pages, {}-byte minimum span)",
            map.num_classes,
            map.max_size,
            config.page_size(),
            min_span
        );
        Ok(map)
    }

    /// Regrow any span smaller than its predecessor's so spans never shrink
    /// as sizes grow. Canonical sizes are left alone.
    fn widen_shrinking_spans(&mut self, min_span: usize) {
        for cl in 2..=self.num_classes {
            let prev = self.class_to_pages[cl - 1];
            if self.class_to_pages[cl] >= prev {
                continue;
            }
            let size = self.class_to_size[cl];
            let mut psize = prev << self.page_shift;
            while psize % size > psize >> 3 {
                psize += min_span;
            }
            self.class_to_pages[cl] = psize >> self.page_shift;
        }
    }

    /// Point every representable size at the smallest class covering it.
    fn fill_class_array(&mut self, alignment: usize) {
        let mut next_size = 0;
        for cl in 1..=self.num_classes {
            let max_size_in_class = self.class_to_size[cl];
            let mut s = next_size;
            while s <= max_size_in_class {
                let idx = self.class_index(s);
                self.class_array[idx] = cl as u8;
                s += alignment;
            }
            next_size = max_size_in_class + alignment;
        }
    }
}
