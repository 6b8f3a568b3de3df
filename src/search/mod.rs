/// Segment search over sampled frames
///
/// Loop mode looks for visually similar start/end pairs within span bounds;
/// cut mode looks for large discontinuities between adjacent samples.

pub mod cuts;
pub mod loops;

pub use cuts::{
    detect_cuts, group_segments, segments_from_cuts, CutAccumulator, CutParams, CutReport, Segment, SegmentGroup,
};
pub use loops::{best_loop_in_window, find_loops, search_chunk, LoopHit, LoopSearchParams};
