//! Self-checks run on every freshly planned table.

use super::{PlanError, SizeMap, CLASS_ARRAY_SIZE, LARGE_SHIFT};

/// Size 0 and the largest size must both land inside the index table.
pub(super) fn verify_index_bounds(map: &SizeMap) -> Result<(), PlanError> {
    for size in [0, map.max_size] {
        let index = map.class_index(size);
        let in_range = if size == 0 { index == 0 } else { index < CLASS_ARRAY_SIZE };
        if !in_range {
            return Err(PlanError::ClassIndexOutOfRange {
                size,
                index,
                capacity: CLASS_ARRAY_SIZE,
            });
        }
    }
    Ok(())
}

pub(super) fn verify(map: &SizeMap) -> Result<(), PlanError> {
    verify_ordering(map)?;
    verify_coverage(map)?;
    verify_natural_alignment(map)
}

fn verify_ordering(map: &SizeMap) -> Result<(), PlanError> {
    for class in 2..=map.num_classes {
        if map.class_to_size[class] <= map.class_to_size[class - 1]
            || map.class_to_pages[class] < map.class_to_pages[class - 1]
        {
            return Err(PlanError::NotMonotonic { class });
        }
    }
    Ok(())
}

/// Every size maps to the smallest class that holds it.
fn verify_coverage(map: &SizeMap) -> Result<(), PlanError> {
    let small_step = 1 << map.align_shift;
    let large_step = 1 << LARGE_SHIFT;
    let mut size = 0;
    while size <= map.max_size {
        let class = map.size_class(size);
        if class == 0 || class > map.num_classes {
            return Err(PlanError::BadClass { class, size });
        }
        if class > 1 && size <= map.class_to_size[class - 1] {
            return Err(PlanError::UnnecessarilyLarge { class, size });
        }
        let class_size = map.class_to_size[class];
        if size > class_size || class_size == 0 {
            return Err(PlanError::SizeNotCovered {
                class,
                class_size,
                size,
            });
        }
        size += if size <= map.max_small_size {
            small_step
        } else {
            large_step
        };
    }
    Ok(())
}

/// Aligned allocation fast paths rely on `size_of(class(i * align)) % align == 0`
/// for every power-of-two `align` up to the page size.
fn verify_natural_alignment(map: &SizeMap) -> Result<(), PlanError> {
    let page_size = map.page_size();
    let mut align = map.min_align;
    while align <= page_size {
        let mut size = align;
        while size < page_size {
            let class_size = map.class_to_size[map.size_class(size)];
            if class_size % align != 0 {
                return Err(PlanError::AlignmentBroken {
                    align,
                    size,
                    class_size,
                });
            }
            size += align;
        }
        align <<= 1;
    }
    Ok(())
}
