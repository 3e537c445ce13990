use glam::Vec3;
use nom::{
    combinator::{all_consuming, map},
    multi::{count, many0},
    number::complete::{le_f32, le_i16, le_i32, le_u16, le_u32, le_u8},
    sequence::tuple,
};

use crate::{
    constants::{
        BSPX_MAGIC, BSPX_NAME_LEN, BSP2RMQ_MAGIC, BSP2_MAGIC, BSP_VERSION_29, BSP_VERSION_30,
        HEADER_LUMPS, LUMP_CLIPNODES, LUMP_EDGES, LUMP_ENTITIES, LUMP_FACES, LUMP_LEAVES,
        LUMP_LIGHTING, LUMP_MARKSURFACES, LUMP_MODELS, LUMP_NODES, LUMP_PLANES, LUMP_SURFEDGES,
        LUMP_TEXINFO, LUMP_TEXTURES, LUMP_VERTICES, LUMP_VISIBILITY, MAX_MAP_HULLS,
        MIPTEX_NAME_LEN, Q2_HEADER_LUMPS, Q2_IDENT, Q2_LUMP_AREAPORTALS, Q2_LUMP_AREAS,
        Q2_LUMP_BRUSHES, Q2_LUMP_BRUSHSIDES, Q2_LUMP_EDGES, Q2_LUMP_ENTITIES, Q2_LUMP_FACES,
        Q2_LUMP_LEAFBRUSHES, Q2_LUMP_LEAFFACES, Q2_LUMP_LEAVES, Q2_LUMP_LIGHTING, Q2_LUMP_MODELS,
        Q2_LUMP_NODES, Q2_LUMP_PLANES, Q2_LUMP_SURFEDGES, Q2_LUMP_TEXINFO, Q2_LUMP_VERTICES,
        Q2_LUMP_VISIBILITY, Q2_TEXTURE_NAME_LEN, Q2_VERSION,
    },
    error::BspError,
    types::{
        Bsp, BspFormat, BspxLump, ClipNode, Face, IResult, Leaf, LumpHeader, MipTex, Model, Node,
        Plane, Q2Area, Q2AreaPortal, Q2Brush, Q2BrushSide, TexInfo,
    },
    utils::parse_entities_text,
};

type NomErr<'a> = nom::Err<nom::error::Error<&'a [u8]>>;

fn parse_lump_header(i: &[u8]) -> IResult<LumpHeader> {
    map(tuple((le_i32, le_i32)), |(offset, length)| LumpHeader {
        offset,
        length,
    })(i)
}

fn parse_vec3(i: &[u8]) -> IResult<Vec3> {
    map(tuple((le_f32, le_f32, le_f32)), |(x, y, z)| {
        Vec3::new(x, y, z)
    })(i)
}

fn parse_plane(i: &[u8]) -> IResult<Plane> {
    map(
        tuple((parse_vec3, le_f32, le_i32)),
        |(normal, distance, type_)| Plane {
            normal,
            distance,
            type_: type_.try_into().unwrap_or(crate::types::PlaneType::AnyZ),
        },
    )(i)
}

fn bounds_i16(i: &[u8]) -> IResult<[f32; 3]> {
    map(tuple((le_i16, le_i16, le_i16)), |(x, y, z)| {
        [x as f32, y as f32, z as f32]
    })(i)
}

fn bounds_f32(i: &[u8]) -> IResult<[f32; 3]> {
    map(tuple((le_f32, le_f32, le_f32)), |(x, y, z)| [x, y, z])(i)
}

fn parse_node_v29(i: &[u8]) -> IResult<Node> {
    map(
        tuple((
            le_i32,
            le_i16,
            le_i16,
            bounds_i16,
            bounds_i16,
            le_u16,
            le_u16,
        )),
        |(plane, child0, child1, mins, maxs, first_face, face_count)| Node {
            plane: plane as u32,
            children: [child0 as i32, child1 as i32],
            mins,
            maxs,
            first_face: first_face as u32,
            face_count: face_count as u32,
        },
    )(i)
}

fn parse_node_bsp2rmq(i: &[u8]) -> IResult<Node> {
    map(
        tuple((
            le_i32,
            le_i32,
            le_i32,
            bounds_i16,
            bounds_i16,
            le_u32,
            le_u32,
        )),
        |(plane, child0, child1, mins, maxs, first_face, face_count)| Node {
            plane: plane as u32,
            children: [child0, child1],
            mins,
            maxs,
            first_face,
            face_count,
        },
    )(i)
}

fn parse_node_bsp2(i: &[u8]) -> IResult<Node> {
    map(
        tuple((
            le_i32,
            le_i32,
            le_i32,
            bounds_f32,
            bounds_f32,
            le_u32,
            le_u32,
        )),
        |(plane, child0, child1, mins, maxs, first_face, face_count)| Node {
            plane: plane as u32,
            children: [child0, child1],
            mins,
            maxs,
            first_face,
            face_count,
        },
    )(i)
}

fn parse_node_q2(i: &[u8]) -> IResult<Node> {
    map(
        tuple((
            le_i32,
            le_i32,
            le_i32,
            bounds_i16,
            bounds_i16,
            le_u16,
            le_u16,
        )),
        |(plane, child0, child1, mins, maxs, first_face, face_count)| Node {
            plane: plane as u32,
            children: [child0, child1],
            mins,
            maxs,
            first_face: first_face as u32,
            face_count: face_count as u32,
        },
    )(i)
}

fn parse_texinfo_q1(i: &[u8]) -> IResult<TexInfo> {
    map(
        tuple((parse_vec3, le_f32, parse_vec3, le_f32, le_u32, le_u32)),
        |(u, u_offset, v, v_offset, texture_index, flags)| TexInfo {
            u,
            u_offset,
            v,
            v_offset,
            texture_index,
            flags,
            value: 0,
            texture_name: String::new(),
            next_texinfo: -1,
        },
    )(i)
}

fn parse_texinfo_q2(i: &[u8]) -> IResult<TexInfo> {
    map(
        tuple((
            parse_vec3,
            le_f32,
            parse_vec3,
            le_f32,
            le_i32,
            le_i32,
            count(le_u8, Q2_TEXTURE_NAME_LEN),
            le_i32,
        )),
        |(u, u_offset, v, v_offset, flags, value, name, next_texinfo)| TexInfo {
            u,
            u_offset,
            v,
            v_offset,
            texture_index: 0,
            flags: flags as u32,
            value,
            texture_name: fixed_string(&name),
            next_texinfo,
        },
    )(i)
}

fn parse_face_short(i: &[u8]) -> IResult<Face> {
    map(
        tuple((
            le_u16,
            le_u16,
            le_i32,
            le_u16,
            le_u16,
            count(le_u8, 4),
            le_i32,
        )),
        |(plane, side, first_edge, edge_count, texinfo, styles, lightmap_offset)| Face {
            plane: plane as u32,
            side: side as u32,
            first_edge,
            edge_count: edge_count as u32,
            texinfo: texinfo as u32,
            styles: [styles[0], styles[1], styles[2], styles[3]],
            lightmap_offset,
        },
    )(i)
}

fn parse_face_long(i: &[u8]) -> IResult<Face> {
    map(
        tuple((
            le_i32,
            le_i32,
            le_i32,
            le_i32,
            le_i32,
            count(le_u8, 4),
            le_i32,
        )),
        |(plane, side, first_edge, edge_count, texinfo, styles, lightmap_offset)| Face {
            plane: plane as u32,
            side: side as u32,
            first_edge,
            edge_count: edge_count as u32,
            texinfo: texinfo as u32,
            styles: [styles[0], styles[1], styles[2], styles[3]],
            lightmap_offset,
        },
    )(i)
}

fn parse_clipnode_short(i: &[u8]) -> IResult<ClipNode> {
    map(
        tuple((le_i32, le_i16, le_i16)),
        |(plane, child0, child1)| ClipNode {
            plane,
            children: [child0 as i32, child1 as i32],
        },
    )(i)
}

fn parse_clipnode_long(i: &[u8]) -> IResult<ClipNode> {
    map(
        tuple((le_i32, le_i32, le_i32)),
        |(plane, child0, child1)| ClipNode {
            plane,
            children: [child0, child1],
        },
    )(i)
}

fn parse_leaf_v29(i: &[u8]) -> IResult<Leaf> {
    map(
        tuple((
            le_i32,
            le_i32,
            bounds_i16,
            bounds_i16,
            le_u16,
            le_u16,
            count(le_u8, 4),
        )),
        |(contents, vis_offset, mins, maxs, first, num, ambient)| Leaf {
            contents,
            vis_offset,
            mins,
            maxs,
            first_mark_surface: first as u32,
            mark_surface_count: num as u32,
            ambient_levels: [ambient[0], ambient[1], ambient[2], ambient[3]],
            cluster: -1,
            area: 0,
            first_leaf_brush: 0,
            leaf_brush_count: 0,
        },
    )(i)
}

fn parse_leaf_bsp2rmq(i: &[u8]) -> IResult<Leaf> {
    map(
        tuple((
            le_i32,
            le_i32,
            bounds_i16,
            bounds_i16,
            le_u32,
            le_u32,
            count(le_u8, 4),
        )),
        |(contents, vis_offset, mins, maxs, first, num, ambient)| Leaf {
            contents,
            vis_offset,
            mins,
            maxs,
            first_mark_surface: first,
            mark_surface_count: num,
            ambient_levels: [ambient[0], ambient[1], ambient[2], ambient[3]],
            cluster: -1,
            area: 0,
            first_leaf_brush: 0,
            leaf_brush_count: 0,
        },
    )(i)
}

fn parse_leaf_bsp2(i: &[u8]) -> IResult<Leaf> {
    map(
        tuple((
            le_i32,
            le_i32,
            bounds_f32,
            bounds_f32,
            le_u32,
            le_u32,
            count(le_u8, 4),
        )),
        |(contents, vis_offset, mins, maxs, first, num, ambient)| Leaf {
            contents,
            vis_offset,
            mins,
            maxs,
            first_mark_surface: first,
            mark_surface_count: num,
            ambient_levels: [ambient[0], ambient[1], ambient[2], ambient[3]],
            cluster: -1,
            area: 0,
            first_leaf_brush: 0,
            leaf_brush_count: 0,
        },
    )(i)
}

fn parse_leaf_q2(i: &[u8]) -> IResult<Leaf> {
    map(
        tuple((
            le_i32,
            le_i16,
            le_i16,
            bounds_i16,
            bounds_i16,
            le_u16,
            le_u16,
            le_u16,
            le_u16,
        )),
        |(contents, cluster, area, mins, maxs, first_face, face_count, first_brush, brush_count)| {
            Leaf {
                contents,
                vis_offset: -1,
                mins,
                maxs,
                first_mark_surface: first_face as u32,
                mark_surface_count: face_count as u32,
                ambient_levels: [0; 4],
                cluster: cluster as i32,
                area: area as i32,
                first_leaf_brush: first_brush as u32,
                leaf_brush_count: brush_count as u32,
            }
        },
    )(i)
}

fn parse_model_q1(i: &[u8]) -> IResult<Model> {
    map(
        tuple((
            parse_vec3,
            parse_vec3,
            parse_vec3,
            count(le_i32, MAX_MAP_HULLS),
            le_i32,
            le_i32,
            le_i32,
        )),
        |(mins, maxs, origin, head_nodes, vis_leaves_count, first_face, face_count)| Model {
            mins,
            maxs,
            origin,
            head_nodes: [head_nodes[0], head_nodes[1], head_nodes[2], head_nodes[3]],
            vis_leaves_count,
            first_face,
            face_count,
        },
    )(i)
}

fn parse_model_q2(i: &[u8]) -> IResult<Model> {
    map(
        tuple((parse_vec3, parse_vec3, parse_vec3, le_i32, le_i32, le_i32)),
        |(mins, maxs, origin, head_node, first_face, face_count)| Model {
            mins,
            maxs,
            origin,
            head_nodes: [head_node, -1, -1, -1],
            vis_leaves_count: 0,
            first_face,
            face_count,
        },
    )(i)
}

fn fixed_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}

pub fn parse_miptex(i: &[u8]) -> IResult<MipTex> {
    let (rest, (name, width, height, o0, o1, o2, o3)) = tuple((
        count(le_u8, MIPTEX_NAME_LEN),
        le_u32,
        le_u32,
        le_u32,
        le_u32,
        le_u32,
        le_u32,
    ))(i)?;

    Ok((
        &[],
        MipTex {
            name: fixed_string(&name),
            width,
            height,
            offsets: [o0, o1, o2, o3],
            data: rest.to_vec(),
        },
    ))
}

fn parse_textures(i: &[u8]) -> Result<Vec<Option<MipTex>>, NomErr> {
    if i.is_empty() {
        return Ok(vec![]);
    }

    let (header, tex_count) = le_u32(i)?;
    let (_, offsets) = count(le_i32, tex_count as usize)(header)?;

    // Miptex blobs are laid out back to back; the slice of one ends where
    // the next begins.
    let mut sorted: Vec<i32> = offsets.iter().copied().filter(|&o| o >= 0).collect();
    sorted.sort_unstable();

    let mut miptexes = Vec::with_capacity(offsets.len());

    for offset in &offsets {
        if *offset < 0 {
            miptexes.push(None);
            continue;
        }

        let start = *offset as usize;
        let end = sorted
            .iter()
            .find(|&&o| o > *offset)
            .map(|&o| o as usize)
            .unwrap_or(i.len());

        let (_, miptex) = parse_miptex(&i[start..end.min(i.len())])?;
        miptexes.push(Some(miptex));
    }

    Ok(miptexes)
}

fn parse_bspx(file: &[u8], lumps_end: usize) -> Vec<BspxLump> {
    let start = (lumps_end + 3) & !3;

    if file.len() < start + 8 || &file[start..start + 4] != BSPX_MAGIC {
        return vec![];
    }

    let lump_count = u32::from_le_bytes([
        file[start + 4],
        file[start + 5],
        file[start + 6],
        file[start + 7],
    ]) as usize;

    let mut lumps = Vec::with_capacity(lump_count);
    let mut cursor = start + 8;

    for _ in 0..lump_count {
        if file.len() < cursor + BSPX_NAME_LEN + 8 {
            break;
        }

        let name = fixed_string(&file[cursor..cursor + BSPX_NAME_LEN]);
        let ofs = u32::from_le_bytes(
            file[cursor + BSPX_NAME_LEN..cursor + BSPX_NAME_LEN + 4]
                .try_into()
                .unwrap(),
        ) as usize;
        let len = u32::from_le_bytes(
            file[cursor + BSPX_NAME_LEN + 4..cursor + BSPX_NAME_LEN + 8]
                .try_into()
                .unwrap(),
        ) as usize;

        if ofs + len <= file.len() {
            lumps.push(BspxLump {
                name,
                data: file[ofs..ofs + len].to_vec(),
            });
        }

        cursor += BSPX_NAME_LEN + 8;
    }

    lumps
}

fn lump_slice<'a>(file: &'a [u8], lump: &LumpHeader) -> Result<&'a [u8], BspError> {
    let start = lump.offset as usize;
    let end = start + lump.length as usize;

    if lump.offset < 0 || lump.length < 0 || end > file.len() {
        return Err(BspError::LumpBounds);
    }

    Ok(&file[start..end])
}

fn all<'a, T>(
    parser: impl FnMut(&'a [u8]) -> IResult<'a, T>,
    i: &'a [u8],
    lump: &'static str,
) -> Result<Vec<T>, BspError> {
    let (_, items) =
        all_consuming(many0(parser))(i).map_err(|_: NomErr| BspError::ParseLump { lump })?;
    Ok(items)
}

pub fn parse_bsp(file: &[u8]) -> Result<Bsp, BspError> {
    let (rest, magic) = le_i32::<_, nom::error::Error<&[u8]>>(file)
        .map_err(|_| BspError::ParseLump { lump: "header" })?;

    match magic {
        BSP_VERSION_29 => parse_quake_family(file, rest, BspFormat::V29),
        BSP_VERSION_30 => parse_quake_family(file, rest, BspFormat::GoldSrc30),
        m if m == BSP2_MAGIC => parse_quake_family(file, rest, BspFormat::Bsp2),
        m if m == BSP2RMQ_MAGIC => parse_quake_family(file, rest, BspFormat::Bsp2rmq),
        m if m == Q2_IDENT => {
            let (rest, version) = le_i32::<_, nom::error::Error<&[u8]>>(rest)
                .map_err(|_| BspError::ParseLump { lump: "header" })?;

            if version != Q2_VERSION {
                return BspError::UnsupportedVersion { version }.to_result();
            }

            parse_quake2(file, rest)
        }
        version => BspError::UnsupportedVersion { version }.to_result(),
    }
}

fn parse_quake_family(file: &[u8], header: &[u8], format: BspFormat) -> Result<Bsp, BspError> {
    let (_, lumps) = count(parse_lump_header, HEADER_LUMPS)(header)
        .map_err(|_: NomErr| BspError::ParseLump { lump: "header" })?;

    let section = |idx: usize| lump_slice(file, &lumps[idx]);

    let entities =
        parse_entities_text(section(LUMP_ENTITIES)?).ok_or(BspError::ParseEntities)?;
    let planes = all(parse_plane, section(LUMP_PLANES)?, "planes")?;
    let textures = parse_textures(section(LUMP_TEXTURES)?)
        .map_err(|_| BspError::ParseLump { lump: "textures" })?;
    let vertices = all(parse_vec3, section(LUMP_VERTICES)?, "vertices")?;
    let visibility = section(LUMP_VISIBILITY)?.to_vec();

    let nodes = match format {
        BspFormat::V29 | BspFormat::GoldSrc30 => all(parse_node_v29, section(LUMP_NODES)?, "nodes"),
        BspFormat::Bsp2rmq => all(parse_node_bsp2rmq, section(LUMP_NODES)?, "nodes"),
        _ => all(parse_node_bsp2, section(LUMP_NODES)?, "nodes"),
    }?;

    let texinfo = all(parse_texinfo_q1, section(LUMP_TEXINFO)?, "texinfo")?;

    let faces = match format {
        BspFormat::V29 | BspFormat::GoldSrc30 => all(parse_face_short, section(LUMP_FACES)?, "faces"),
        _ => all(parse_face_long, section(LUMP_FACES)?, "faces"),
    }?;

    let lighting = section(LUMP_LIGHTING)?.to_vec();

    let clipnodes = match format {
        BspFormat::V29 | BspFormat::GoldSrc30 => {
            all(parse_clipnode_short, section(LUMP_CLIPNODES)?, "clipnodes")
        }
        _ => all(parse_clipnode_long, section(LUMP_CLIPNODES)?, "clipnodes"),
    }?;

    let leaves = match format {
        BspFormat::V29 | BspFormat::GoldSrc30 => all(parse_leaf_v29, section(LUMP_LEAVES)?, "leaves"),
        BspFormat::Bsp2rmq => all(parse_leaf_bsp2rmq, section(LUMP_LEAVES)?, "leaves"),
        _ => all(parse_leaf_bsp2, section(LUMP_LEAVES)?, "leaves"),
    }?;

    let mark_surfaces = match format {
        BspFormat::V29 | BspFormat::GoldSrc30 => all(
            map(le_u16, |v| v as u32),
            section(LUMP_MARKSURFACES)?,
            "marksurfaces",
        ),
        _ => all(le_u32, section(LUMP_MARKSURFACES)?, "marksurfaces"),
    }?;

    let edges = match format {
        BspFormat::V29 | BspFormat::GoldSrc30 => all(
            map(tuple((le_u16, le_u16)), |(a, b)| [a as u32, b as u32]),
            section(LUMP_EDGES)?,
            "edges",
        ),
        _ => all(
            map(tuple((le_u32, le_u32)), |(a, b)| [a, b]),
            section(LUMP_EDGES)?,
            "edges",
        ),
    }?;

    let surf_edges = all(le_i32, section(LUMP_SURFEDGES)?, "surfedges")?;
    let models = all(parse_model_q1, section(LUMP_MODELS)?, "models")?;

    let lumps_end = lumps
        .iter()
        .map(|l| (l.offset + l.length) as usize)
        .max()
        .unwrap_or(0);

    Ok(Bsp {
        format,
        entities,
        planes,
        textures,
        vertices,
        visibility,
        nodes,
        texinfo,
        faces,
        lighting,
        clipnodes,
        leaves,
        mark_surfaces,
        leaf_brushes: vec![],
        edges,
        surf_edges,
        models,
        brushes: vec![],
        brush_sides: vec![],
        areas: vec![],
        area_portals: vec![],
        bspx: parse_bspx(file, lumps_end),
    })
}

fn parse_quake2(file: &[u8], header: &[u8]) -> Result<Bsp, BspError> {
    let (_, lumps) = count(parse_lump_header, Q2_HEADER_LUMPS)(header)
        .map_err(|_: NomErr| BspError::ParseLump { lump: "header" })?;

    let section = |idx: usize| lump_slice(file, &lumps[idx]);

    let entities =
        parse_entities_text(section(Q2_LUMP_ENTITIES)?).ok_or(BspError::ParseEntities)?;
    let planes = all(parse_plane, section(Q2_LUMP_PLANES)?, "planes")?;
    let vertices = all(parse_vec3, section(Q2_LUMP_VERTICES)?, "vertices")?;
    let visibility = section(Q2_LUMP_VISIBILITY)?.to_vec();
    let nodes = all(parse_node_q2, section(Q2_LUMP_NODES)?, "nodes")?;
    let texinfo = all(parse_texinfo_q2, section(Q2_LUMP_TEXINFO)?, "texinfo")?;
    let faces = all(parse_face_short, section(Q2_LUMP_FACES)?, "faces")?;
    let lighting = section(Q2_LUMP_LIGHTING)?.to_vec();
    let leaves = all(parse_leaf_q2, section(Q2_LUMP_LEAVES)?, "leaves")?;
    let mark_surfaces = all(
        map(le_u16, |v| v as u32),
        section(Q2_LUMP_LEAFFACES)?,
        "leaffaces",
    )?;
    let leaf_brushes = all(
        map(le_u16, |v| v as u32),
        section(Q2_LUMP_LEAFBRUSHES)?,
        "leafbrushes",
    )?;
    let edges = all(
        map(tuple((le_u16, le_u16)), |(a, b)| [a as u32, b as u32]),
        section(Q2_LUMP_EDGES)?,
        "edges",
    )?;
    let surf_edges = all(le_i32, section(Q2_LUMP_SURFEDGES)?, "surfedges")?;
    let models = all(parse_model_q2, section(Q2_LUMP_MODELS)?, "models")?;
    let brushes = all(
        map(tuple((le_i32, le_i32, le_i32)), |(f, n, c)| Q2Brush {
            first_side: f,
            side_count: n,
            contents: c,
        }),
        section(Q2_LUMP_BRUSHES)?,
        "brushes",
    )?;
    let brush_sides = all(
        map(tuple((le_u16, le_i16)), |(plane, texinfo)| Q2BrushSide {
            plane,
            texinfo,
        }),
        section(Q2_LUMP_BRUSHSIDES)?,
        "brushsides",
    )?;
    let areas = all(
        map(tuple((le_i32, le_i32)), |(n, f)| Q2Area {
            portal_count: n,
            first_portal: f,
        }),
        section(Q2_LUMP_AREAS)?,
        "areas",
    )?;
    let area_portals = all(
        map(tuple((le_i32, le_i32)), |(p, o)| Q2AreaPortal {
            portal_num: p,
            other_area: o,
        }),
        section(Q2_LUMP_AREAPORTALS)?,
        "areaportals",
    )?;

    let lumps_end = lumps
        .iter()
        .map(|l| (l.offset + l.length) as usize)
        .max()
        .unwrap_or(0);

    Ok(Bsp {
        format: BspFormat::Quake2,
        entities,
        planes,
        textures: vec![],
        vertices,
        visibility,
        nodes,
        texinfo,
        faces,
        lighting,
        clipnodes: vec![],
        leaves,
        mark_surfaces,
        leaf_brushes,
        edges,
        surf_edges,
        models,
        brushes,
        brush_sides,
        areas,
        area_portals,
        bspx: parse_bspx(file, lumps_end),
    })
}
