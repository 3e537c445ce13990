/// Side-test epsilon for BSP classification.
pub static ON_EPSILON: f64 = 0.05;
/// Vertex/plane-distance comparison epsilon.
pub static EQUAL_EPSILON: f64 = 0.001;
/// Plane-normal comparison epsilon.
pub static ANGLE_EPSILON: f64 = 0.000001;
/// Windings with a shorter edge collapse during healing.
pub static TINY_EDGE: f64 = 0.3;

/// Half-extent of the base winding laid on a plane before clipping;
/// twice the playable coordinate range.
pub static BOGUS_RANGE: f64 = 131072.;

/// Texture-space extent limit per face, in luxels.
pub static MAX_SURFACE_EXTENT: i32 = 2048;

/// Faces larger than this in texture space get subdivided.
pub static DEFAULT_SUBDIVIDE_SIZE: f64 = 240.;
/// Midsplit fallback kicks in above this node box size.
pub static DEFAULT_MAX_NODE_SIZE: f64 = 1024.;

/// World units per luxel.
pub static DEFAULT_LIGHTMAP_SCALE: f64 = 16.;

pub static ORIGIN_TEXTURE: &str = "origin";
pub static CLIP_TEXTURE: &str = "clip";
pub static SKIP_TEXTURE: &str = "skip";
pub static HINT_TEXTURE: &str = "hint";
pub static TRENCHBROOM_EMPTY_TEXTURE: &str = "__TB_empty";

/// Brush-entity classnames whose brushes merge into the world.
pub static DETAIL_CLASSNAMES: &[&str] = &[
    "func_detail",
    "func_detail_wall",
    "func_detail_illusionary",
    "func_detail_fence",
    "func_group",
];
