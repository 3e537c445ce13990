use glam::Vec3;

use nom::IResult as _IResult;

use crate::constants::MAX_MAP_HULLS;

pub type IResult<'a, T> = _IResult<&'a [u8], T>;
pub type SResult<'a, T> = _IResult<&'a str, T>;

#[derive(Debug, Clone, Copy)]
pub struct LumpHeader {
    pub offset: i32,
    pub length: i32,
}

/// On-disk dialect. All of them share the wide in-memory model; the format
/// tag only matters at read/write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BspFormat {
    /// Quake, version 29.
    V29,
    /// RMQ interim "2PSB": 32-bit indices, 16-bit bounds.
    Bsp2rmq,
    /// "BSP2": 32-bit indices, float bounds.
    Bsp2,
    /// GoldSrc, version 30.
    GoldSrc30,
    /// Quake II IBSP version 38.
    Quake2,
}

impl BspFormat {
    pub fn is_quake2(&self) -> bool {
        matches!(self, BspFormat::Quake2)
    }

    /// Bytes per luxel in the lighting lump.
    pub fn lighting_channels(&self) -> usize {
        match self {
            BspFormat::V29 | BspFormat::Bsp2 | BspFormat::Bsp2rmq => 1,
            BspFormat::GoldSrc30 | BspFormat::Quake2 => 3,
        }
    }
}

impl std::fmt::Display for BspFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BspFormat::V29 => "v29",
            BspFormat::Bsp2rmq => "BSP2rmq",
            BspFormat::Bsp2 => "BSP2",
            BspFormat::GoldSrc30 => "GoldSrc 30",
            BspFormat::Quake2 => "IBSP 38",
        };
        write!(f, "{}", name)
    }
}

/// Entity epairs in file order. Duplicate keys keep first-wins lookup, the
/// way the engines read them; preserving order keeps writes deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entity {
    pairs: Vec<(String, String)>,
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.into(),
            None => self.insert(key.to_string(), value),
        }
    }

    pub fn classname(&self) -> &str {
        self.get("classname").unwrap_or("")
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl FromIterator<(String, String)> for Entity {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub enum PlaneType {
    X = 0,
    Y = 1,
    Z = 2,
    AnyX = 3,
    AnyY = 4,
    AnyZ = 5,
}

impl TryFrom<i32> for PlaneType {
    type Error = &'static str;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::X,
            1 => Self::Y,
            2 => Self::Z,
            3 => Self::AnyX,
            4 => Self::AnyY,
            5 => Self::AnyZ,
            _ => return Err("Not a valid plane type"),
        })
    }
}

impl PlaneType {
    pub fn from_normal(normal: Vec3) -> Self {
        if normal.x == 1. || normal.x == -1. {
            Self::X
        } else if normal.y == 1. || normal.y == -1. {
            Self::Y
        } else if normal.z == 1. || normal.z == -1. {
            Self::Z
        } else {
            let abs = normal.abs();
            if abs.x >= abs.y && abs.x >= abs.z {
                Self::AnyX
            } else if abs.y >= abs.z {
                Self::AnyY
            } else {
                Self::AnyZ
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
    pub type_: PlaneType,
}

impl Plane {
    pub fn flip(&self) -> Self {
        Self {
            normal: -self.normal,
            distance: -self.distance,
            type_: self.type_,
        }
    }
}

/// Wide node: children use the on-disk convention, negative means
/// `-(leaf_index + 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub plane: u32,
    pub children: [i32; 2],
    pub mins: [f32; 3],
    pub maxs: [f32; 3],
    pub first_face: u32,
    pub face_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TexInfo {
    pub u: Vec3,
    pub u_offset: f32,
    pub v: Vec3,
    pub v_offset: f32,
    /// Q1/GoldSrc: index into the textures lump. Unused for Q2.
    pub texture_index: u32,
    /// Q1: special-surface bit. Q2: native surface flags.
    pub flags: u32,
    /// Q2 only.
    pub value: i32,
    /// Q2 only: inline texture name.
    pub texture_name: String,
    /// Q2 only: animation chain, -1 terminated.
    pub next_texinfo: i32,
}

impl TexInfo {
    /// Q1 TEX_SPECIAL: no lightmap (sky and liquids).
    pub const SPECIAL: u32 = 1;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub plane: u32,
    pub side: u32,
    pub first_edge: i32,
    pub edge_count: u32,
    pub texinfo: u32,
    pub styles: [u8; 4],
    pub lightmap_offset: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipNode {
    pub plane: i32,
    pub children: [i32; 2],
}

/// Q1/GoldSrc leaf contents. Q2 uses the `Q2Contents` bitfield instead;
/// `Leaf::contents` stores the raw value either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub enum LeafContents {
    Empty = -1,
    Solid = -2,
    Water = -3,
    Slime = -4,
    Lava = -5,
    Sky = -6,
    Origin = -7,
    Clip = -8,
    Current0 = -9,
    Current90 = -10,
    Current180 = -11,
    Current270 = -12,
    CurrentUp = -13,
    CurrentDown = -14,
    Translucent = -15,
}

impl TryFrom<i32> for LeafContents {
    type Error = &'static str;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            -1 => Self::Empty,
            -2 => Self::Solid,
            -3 => Self::Water,
            -4 => Self::Slime,
            -5 => Self::Lava,
            -6 => Self::Sky,
            -7 => Self::Origin,
            -8 => Self::Clip,
            -9 => Self::Current0,
            -10 => Self::Current90,
            -11 => Self::Current180,
            -12 => Self::Current270,
            -13 => Self::CurrentUp,
            -14 => Self::CurrentDown,
            -15 => Self::Translucent,
            _ => return Err("Not a valid leaf contents value"),
        })
    }
}

bitflags::bitflags! {
    /// Quake II leaf/brush contents.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Q2Contents: u32 {
        const SOLID = 1;
        const WINDOW = 2;
        const AUX = 4;
        const LAVA = 8;
        const SLIME = 16;
        const WATER = 32;
        const MIST = 64;
        const AREAPORTAL = 0x8000;
        const PLAYERCLIP = 0x10000;
        const MONSTERCLIP = 0x20000;
        const CURRENT_0 = 0x40000;
        const CURRENT_90 = 0x80000;
        const CURRENT_180 = 0x100000;
        const CURRENT_270 = 0x200000;
        const CURRENT_UP = 0x400000;
        const CURRENT_DOWN = 0x800000;
        const ORIGIN = 0x1000000;
        const MONSTER = 0x2000000;
        const DEADMONSTER = 0x4000000;
        const DETAIL = 0x8000000;
        const TRANSLUCENT = 0x10000000;
        const LADDER = 0x20000000;
    }
}

bitflags::bitflags! {
    /// Quake II surface flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Q2Surface: u32 {
        const LIGHT = 1;
        const SLICK = 2;
        const SKY = 4;
        const WARP = 8;
        const TRANS33 = 0x10;
        const TRANS66 = 0x20;
        const FLOWING = 0x40;
        const NODRAW = 0x80;
        const HINT = 0x100;
        const SKIP = 0x200;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub contents: i32,
    pub vis_offset: i32,
    pub mins: [f32; 3],
    pub maxs: [f32; 3],
    pub first_mark_surface: u32,
    pub mark_surface_count: u32,
    /// Q1/GoldSrc only.
    pub ambient_levels: [u8; 4],
    /// Q2 only.
    pub cluster: i32,
    pub area: i32,
    pub first_leaf_brush: u32,
    pub leaf_brush_count: u32,
}

pub type MarkSurface = u32;
pub type Edge = [u32; 2];
pub type SurfEdge = i32;

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub origin: Vec3,
    /// Q1 hulls. Q2 only uses `head_nodes[0]`.
    pub head_nodes: [i32; MAX_MAP_HULLS],
    pub vis_leaves_count: i32,
    pub first_face: i32,
    pub face_count: i32,
}

/// Q2 collision brush.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Q2Brush {
    pub first_side: i32,
    pub side_count: i32,
    pub contents: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Q2BrushSide {
    pub plane: u16,
    pub texinfo: i16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Q2Area {
    pub portal_count: i32,
    pub first_portal: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Q2AreaPortal {
    pub portal_num: i32,
    pub other_area: i32,
}

/// Q1/GoldSrc miptex. The bytes after the fixed header (mip levels, and the
/// GoldSrc palette) are preserved verbatim in `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct MipTex {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub offsets: [u32; 4],
    pub data: Vec<u8>,
}

/// A named auxiliary lump appended after the canonical ones.
#[derive(Debug, Clone, PartialEq)]
pub struct BspxLump {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bsp {
    pub format: BspFormat,
    pub entities: Vec<Entity>,
    pub planes: Vec<Plane>,
    /// Q1/GoldSrc. `None` slots are the -1 placeholder offsets some
    /// compilers leave behind.
    pub textures: Vec<Option<MipTex>>,
    pub vertices: Vec<Vec3>,
    pub visibility: Vec<u8>,
    pub nodes: Vec<Node>,
    pub texinfo: Vec<TexInfo>,
    pub faces: Vec<Face>,
    /// Raw lighting bytes: 1 byte/luxel for Quake, 3 for GoldSrc/Q2.
    pub lighting: Vec<u8>,
    pub clipnodes: Vec<ClipNode>,
    pub leaves: Vec<Leaf>,
    pub mark_surfaces: Vec<MarkSurface>,
    pub leaf_brushes: Vec<u32>,
    pub edges: Vec<Edge>,
    pub surf_edges: Vec<SurfEdge>,
    pub models: Vec<Model>,
    pub brushes: Vec<Q2Brush>,
    pub brush_sides: Vec<Q2BrushSide>,
    pub areas: Vec<Q2Area>,
    pub area_portals: Vec<Q2AreaPortal>,
    pub bspx: Vec<BspxLump>,
}

impl Bsp {
    pub fn bspx_lump(&self, name: &str) -> Option<&[u8]> {
        self.bspx
            .iter()
            .find(|lump| lump.name == name)
            .map(|lump| lump.data.as_slice())
    }

    pub fn set_bspx_lump(&mut self, name: &str, data: Vec<u8>) {
        match self.bspx.iter_mut().find(|lump| lump.name == name) {
            Some(lump) => lump.data = data,
            None => self.bspx.push(BspxLump {
                name: name.to_string(),
                data,
            }),
        }
    }

    /// Leaf index containing `point`, walking from the given head node.
    pub fn leaf_at(&self, head_node: i32, point: Vec3) -> usize {
        let mut index = head_node;

        while index >= 0 {
            let node = &self.nodes[index as usize];
            let plane = &self.planes[node.plane as usize];

            let side = plane.normal.dot(point) - plane.distance;
            index = if side >= 0. {
                node.children[0]
            } else {
                node.children[1]
            };
        }

        (-index - 1) as usize
    }
}

impl Default for BspFormat {
    fn default() -> Self {
        BspFormat::V29
    }
}
