//! Out-of-core brick streaming
//!
//! Residency cache with distance-based eviction, view ordering, throughput
//! estimation, multi-channel quota merging and the progressive scheduler
//! that ties them together.

pub mod budget;
pub mod backend;
pub mod cache;
pub mod view_sort;
pub mod estimator;
pub mod quota;
pub mod scheduler;

pub use budget::MemoryBudget;
pub use backend::{
    HeadlessAllocator, SampleFilter, TextureAllocator, TextureDesc,
    WgpuAllocator, WgpuBrickTexture,
};
pub use cache::{
    AdmitRequest, Admission, CacheStats, RejectReason, ResidencyCache, ResidentKey,
};
pub use view_sort::{ViewSorter, visibility_distance};
pub use estimator::{EstimatorMode, ThroughputEstimator, ThroughputHistory};
pub use quota::{MultiChannelQuotaMerger, distribute_channel_quota};
pub use scheduler::{
    BrickDraw, DrawSink, IncrementalRenderScheduler, LoopState, SliceMode, SliceModeKind,
    SliceOutcome, SliceProgress, SliceReport,
};
