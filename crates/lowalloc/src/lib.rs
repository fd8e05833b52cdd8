//! Low-level memory substrate for a malloc replacement.
//!
//! Two things live here: the size-class table that decides which canonical
//! size every small request is rounded up to ([`size_class`]), and the
//! allocators the main allocator uses for its own bookkeeping, which must
//! never call back into it ([`arena`], [`metadata`]). Both sit on top of the
//! [`PagesAllocator`] capability.

extern crate libc;

pub mod arena;
pub mod config;
pub mod hooks;
pub mod metadata;
pub mod pages;
pub mod platform;
pub mod size_class;
pub mod sync;
pub mod util;

pub use arena::{
    default_arena, delete_arena, new_arena, new_arena_with_pages, Arena, ArenaError, ArenaFlags,
    ArenaStats,
};
pub use metadata::{meta_data_alloc, metadata_system_bytes, MetadataAllocator};
pub use pages::{default_pages_allocator, OsPages, PagesAllocator, OS_PAGES};
pub use size_class::{classify, size_map, PlanError, PlannerConfig, SizeClass, SizeMap};
