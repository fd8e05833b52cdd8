//! Size classes: the table every small allocation is rounded up to.
//!
//! The table is planned once per process (see [`SizeMap::plan`]) and is
//! read-only afterwards, so lookups need no synchronization.

mod check;
mod planner;

pub use planner::{PlanError, PlannerConfig};

use crate::sync::InitCell;
use core::fmt;

/// Upper bound on size classes, class 0 included.
pub const MAX_SIZE_CLASSES: usize = 128;

pub const DEFAULT_ALIGNMENT: usize = 8;
pub const DEFAULT_MIN_ALIGN: usize = 16;
pub const DEFAULT_MAX_SMALL_SIZE: usize = 1024;
pub const DEFAULT_MAX_SIZE: usize = 256 * 1024;
/// log2 of the logical page size spans are measured in.
pub const DEFAULT_PAGE_SHIFT: u32 = 13;

/// Above the small range, sizes are quantized to 128 bytes.
const LARGE_SHIFT: u32 = 7;

/// Number of entries in the class index table.
pub const CLASS_ARRAY_SIZE: usize =
    class_index_for(DEFAULT_MAX_SIZE, DEFAULT_MAX_SMALL_SIZE, DEFAULT_ALIGNMENT.trailing_zeros()) + 1;

/// Quantize `size` into a class index table slot.
const fn class_index_for(size: usize, max_small_size: usize, align_shift: u32) -> usize {
    if size <= max_small_size {
        (size + (1 << align_shift) - 1) >> align_shift
    } else {
        let offset = (max_small_size >> align_shift) - (max_small_size >> LARGE_SHIFT);
        (size + (1 << LARGE_SHIFT) - 1 + (offset << LARGE_SHIFT)) >> LARGE_SHIFT
    }
}

/// Result of classifying a request size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    /// Class id, 1-based. 0 means "no class".
    pub id: usize,
    /// Canonical size every request in this class is rounded up to.
    pub size: usize,
}

impl SizeClass {
    /// Returned for zero-byte and oversize requests.
    pub const NONE: SizeClass = SizeClass { id: 0, size: 0 };

    #[inline]
    pub fn is_none(&self) -> bool {
        self.id == 0
    }
}

/// One row of the size-class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassInfo {
    pub id: usize,
    pub size: usize,
    pub pages: usize,
    pub objects_to_move: usize,
}

/// The planned size-class table plus its O(1) lookup index.
#[derive(Clone, PartialEq, Eq)]
pub struct SizeMap {
    class_array: [u8; CLASS_ARRAY_SIZE],
    class_to_size: [usize; MAX_SIZE_CLASSES],
    class_to_pages: [usize; MAX_SIZE_CLASSES],
    num_objects_to_move: [usize; MAX_SIZE_CLASSES],
    /// Number of real classes; ids run 1..=num_classes.
    num_classes: usize,
    align_shift: u32,
    min_align: usize,
    max_small_size: usize,
    max_size: usize,
    page_shift: u32,
}

impl SizeMap {
    fn empty(config: &PlannerConfig) -> Self {
        SizeMap {
            class_array: [0; CLASS_ARRAY_SIZE],
            class_to_size: [0; MAX_SIZE_CLASSES],
            class_to_pages: [0; MAX_SIZE_CLASSES],
            num_objects_to_move: [0; MAX_SIZE_CLASSES],
            num_classes: 0,
            align_shift: config.alignment.trailing_zeros(),
            min_align: config.min_align,
            max_small_size: config.max_small_size,
            max_size: config.max_size,
            page_shift: config.page_shift,
        }
    }

    /// Slot of `size` in the class index table.
    #[inline(always)]
    pub fn class_index(&self, size: usize) -> usize {
        class_index_for(size, self.max_small_size, self.align_shift)
    }

    /// Raw table lookup. `size` must not exceed [`max_size`](Self::max_size).
    /// Size 0 shares the first class's slot.
    #[inline(always)]
    pub fn size_class(&self, size: usize) -> usize {
        debug_assert!(size <= self.max_size);
        self.class_array[self.class_index(size)] as usize
    }

    /// Map a request size to its class. Zero-byte and oversize requests get
    /// [`SizeClass::NONE`].
    #[inline]
    pub fn classify(&self, size: usize) -> SizeClass {
        if size == 0 || size > self.max_size {
            return SizeClass::NONE;
        }
        let id = self.size_class(size);
        SizeClass {
            id,
            size: self.class_to_size[id],
        }
    }

    /// True if `size` must take the span path instead of a size class.
    #[inline]
    pub fn is_oversize(&self, size: usize) -> bool {
        size > self.max_size
    }

    #[inline]
    pub fn class_to_size(&self, class: usize) -> usize {
        self.class_to_size[class]
    }

    #[inline]
    pub fn class_to_pages(&self, class: usize) -> usize {
        self.class_to_pages[class]
    }

    /// Batch size for moving objects of this class between caches.
    #[inline]
    pub fn num_objects_to_move(&self, class: usize) -> usize {
        self.num_objects_to_move[class]
    }

    /// Number of classes; valid ids are `1..=num_size_classes()`.
    #[inline]
    pub fn num_size_classes(&self) -> usize {
        self.num_classes
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_small_size(&self) -> usize {
        self.max_small_size
    }

    pub fn page_shift(&self) -> u32 {
        self.page_shift
    }

    pub fn page_size(&self) -> usize {
        1 << self.page_shift
    }

    /// Every class in increasing size order.
    pub fn classes(&self) -> impl Iterator<Item = ClassInfo> + '_ {
        (1..=self.num_classes).map(move |id| ClassInfo {
            id,
            size: self.class_to_size[id],
            pages: self.class_to_pages[id],
            objects_to_move: self.num_objects_to_move[id],
        })
    }
}

impl fmt::Debug for SizeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizeMap")
            .field("num_classes", &self.num_classes)
            .field("max_size", &self.max_size)
            .field("page_shift", &self.page_shift)
            .field("class_to_size", &&self.class_to_size[1..=self.num_classes])
            .field("class_to_pages", &&self.class_to_pages[1..=self.num_classes])
            .finish()
    }
}

static SIZE_MAP: InitCell<SizeMap> = InitCell::new();

/// The process-wide size map, planned from [`PlannerConfig::from_env`] on
/// first use. A planning failure aborts the process.
pub fn size_map() -> &'static SizeMap {
    SIZE_MAP.get_or_init(|| match SizeMap::plan(&PlannerConfig::from_env()) {
        Ok(map) => map,
        Err(err) => crate::util::abort_with_args(format_args!(
            "lowalloc: size class planning failed: {}",
            err
        )),
    })
}

/// Classify `size` against the process-wide size map.
#[inline]
pub fn classify(size: usize) -> SizeClass {
    size_map().classify(size)
}
