use std::mem;

/// Original Quake.
pub const BSP_VERSION_29: i32 = 29;
/// GoldSrc (Half-Life). Same lump table as v29, RGB lighting, paletted miptex.
pub const BSP_VERSION_30: i32 = 30;
/// "BSP2" — 32-bit indices, float bounds.
pub const BSP2_MAGIC: i32 = i32::from_le_bytes(*b"BSP2");
/// "2PSB" — the RMQ interim format: 32-bit indices, 16-bit bounds.
pub const BSP2RMQ_MAGIC: i32 = i32::from_le_bytes(*b"2PSB");
/// Quake II header ident + version.
pub const Q2_IDENT: i32 = i32::from_le_bytes(*b"IBSP");
pub const Q2_VERSION: i32 = 38;

pub const BSPX_MAGIC: &[u8; 4] = b"BSPX";
pub const BSPX_NAME_LEN: usize = 24;

// Q1/GoldSrc lump table
pub const LUMP_ENTITIES: usize = 0;
pub const LUMP_PLANES: usize = 1;
pub const LUMP_TEXTURES: usize = 2;
pub const LUMP_VERTICES: usize = 3;
pub const LUMP_VISIBILITY: usize = 4;
pub const LUMP_NODES: usize = 5;
pub const LUMP_TEXINFO: usize = 6;
pub const LUMP_FACES: usize = 7;
pub const LUMP_LIGHTING: usize = 8;
pub const LUMP_CLIPNODES: usize = 9;
pub const LUMP_LEAVES: usize = 10;
pub const LUMP_MARKSURFACES: usize = 11;
pub const LUMP_EDGES: usize = 12;
pub const LUMP_SURFEDGES: usize = 13;
pub const LUMP_MODELS: usize = 14;
pub const HEADER_LUMPS: usize = 15;

// Q2 lump table
pub const Q2_LUMP_ENTITIES: usize = 0;
pub const Q2_LUMP_PLANES: usize = 1;
pub const Q2_LUMP_VERTICES: usize = 2;
pub const Q2_LUMP_VISIBILITY: usize = 3;
pub const Q2_LUMP_NODES: usize = 4;
pub const Q2_LUMP_TEXINFO: usize = 5;
pub const Q2_LUMP_FACES: usize = 6;
pub const Q2_LUMP_LIGHTING: usize = 7;
pub const Q2_LUMP_LEAVES: usize = 8;
pub const Q2_LUMP_LEAFFACES: usize = 9;
pub const Q2_LUMP_LEAFBRUSHES: usize = 10;
pub const Q2_LUMP_EDGES: usize = 11;
pub const Q2_LUMP_SURFEDGES: usize = 12;
pub const Q2_LUMP_MODELS: usize = 13;
pub const Q2_LUMP_BRUSHES: usize = 14;
pub const Q2_LUMP_BRUSHSIDES: usize = 15;
pub const Q2_LUMP_POP: usize = 16;
pub const Q2_LUMP_AREAS: usize = 17;
pub const Q2_LUMP_AREAPORTALS: usize = 18;
pub const Q2_HEADER_LUMPS: usize = 19;

pub const MAX_MAP_HULLS: usize = 4;
pub const MIPTEX_NAME_LEN: usize = 16;
pub const Q2_TEXTURE_NAME_LEN: usize = 32;

/// Lightmap layers per face in the vanilla formats.
pub const MAX_LIGHTMAPS: usize = 4;
/// With the `LMSTYLE16` BSPX lump.
pub const MAX_LIGHTMAPS_EXT: usize = 16;
/// First compiler-assigned switchable style and the end of the range.
pub const FIRST_SWITCHABLE_STYLE: u8 = 32;
pub const LAST_SWITCHABLE_STYLE: u8 = 63;

// .lit sidecar
pub const LIT_IDENT: &[u8; 4] = b"QLIT";
pub const LIT_VERSION: i32 = 1;
pub const LIT_VERSION_V2: i32 = 2;
/// v1 with the E5BGR9 HDR flag.
pub const LIT_VERSION_E5BGR9: i32 = 0x0001_0001;

pub const HEADER_LUMP_SIZE: usize = mem::size_of::<crate::types::LumpHeader>();
