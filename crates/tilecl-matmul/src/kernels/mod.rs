/// Multi-level parallel matmul with load-balanced thread teams, cache sub-blocks, an optional
/// reduction pass over K and fusion anchors.
pub mod managed;
