use std::{
    ffi::OsStr,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use byte_writer::ByteWriter;

use crate::{
    constants::{
        BSPX_MAGIC, BSPX_NAME_LEN, BSP2RMQ_MAGIC, BSP2_MAGIC, BSP_VERSION_29, BSP_VERSION_30,
        HEADER_LUMPS, HEADER_LUMP_SIZE, LUMP_CLIPNODES, LUMP_EDGES, LUMP_ENTITIES, LUMP_FACES,
        LUMP_LEAVES, LUMP_LIGHTING, LUMP_MARKSURFACES, LUMP_MODELS, LUMP_NODES, LUMP_PLANES,
        LUMP_SURFEDGES, LUMP_TEXINFO, LUMP_TEXTURES, LUMP_VERTICES, LUMP_VISIBILITY,
        MIPTEX_NAME_LEN, Q2_HEADER_LUMPS, Q2_IDENT, Q2_LUMP_AREAPORTALS, Q2_LUMP_AREAS,
        Q2_LUMP_BRUSHES, Q2_LUMP_BRUSHSIDES, Q2_LUMP_EDGES, Q2_LUMP_ENTITIES, Q2_LUMP_FACES,
        Q2_LUMP_LEAFBRUSHES, Q2_LUMP_LEAFFACES, Q2_LUMP_LEAVES, Q2_LUMP_LIGHTING, Q2_LUMP_MODELS,
        Q2_LUMP_NODES, Q2_LUMP_PLANES, Q2_LUMP_SURFEDGES, Q2_LUMP_TEXINFO, Q2_LUMP_VERTICES,
        Q2_LUMP_VISIBILITY, Q2_TEXTURE_NAME_LEN, Q2_VERSION,
    },
    error::BspError,
    parse_bsp,
    types::{Bsp, BspFormat},
    utils::write_entities_text,
};

fn narrow_i16(value: i32, what: &'static str, format: BspFormat) -> Result<i16, BspError> {
    i16::try_from(value).map_err(|_| BspError::FormatOverflow {
        what,
        format: format.to_string(),
    })
}

fn narrow_u16(value: u32, what: &'static str, format: BspFormat) -> Result<u16, BspError> {
    u16::try_from(value).map_err(|_| BspError::FormatOverflow {
        what,
        format: format.to_string(),
    })
}

fn bound_i16(value: f32) -> i16 {
    value.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

struct LumpDirectory {
    headers_offset: usize,
}

impl LumpDirectory {
    fn begin(writer: &mut ByteWriter, lump_count: usize) -> Self {
        let headers_offset = writer.get_offset();
        writer.append_u8_slice(&vec![0u8; HEADER_LUMP_SIZE * lump_count]);

        Self { headers_offset }
    }

    fn write_lump(
        &self,
        writer: &mut ByteWriter,
        index: usize,
        f: impl FnOnce(&mut ByteWriter) -> Result<(), BspError>,
    ) -> Result<(), BspError> {
        let offset = writer.get_offset();
        f(writer)?;
        let length = writer.get_offset() - offset;
        writer.pad_to_4();

        let header = self.headers_offset + index * HEADER_LUMP_SIZE;
        writer.replace_with_i32(header, offset as i32);
        writer.replace_with_i32(header + 4, length as i32);

        Ok(())
    }
}

impl Bsp {
    pub fn from_bytes(bytes: &[u8]) -> Result<Bsp, BspError> {
        parse_bsp(bytes)
    }

    pub fn from_file(path: impl AsRef<Path> + AsRef<OsStr>) -> Result<Bsp, BspError> {
        let path: &Path = path.as_ref();

        let bytes = std::fs::read(path).map_err(|op| BspError::Io {
            source: op,
            path: path.to_path_buf(),
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path> + Into<PathBuf>) -> Result<(), BspError> {
        let bytes = self.write_to_bytes()?;
        let path_buf: PathBuf = path.into();

        let io_err = |source| BspError::Io {
            source,
            path: path_buf.clone(),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path_buf)
            .map_err(io_err)?;

        file.write_all(&bytes).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        Ok(())
    }

    /// Re-tags the BSP for another dialect. Geometry is dialect-agnostic in
    /// memory; range validation happens at write time. Only conversions
    /// within the Quake family make sense.
    pub fn convert_to(&self, format: BspFormat) -> Result<Bsp, BspError> {
        let quake = |f: BspFormat| matches!(f, BspFormat::V29 | BspFormat::Bsp2 | BspFormat::Bsp2rmq);

        if !(quake(self.format) && quake(format)) && self.format != format {
            return BspError::FormatOverflow {
                what: "dialect conversion",
                format: format.to_string(),
            }
            .to_result();
        }

        let mut out = self.clone();
        out.format = format;
        Ok(out)
    }

    pub fn write_to_bytes(&self) -> Result<Vec<u8>, BspError> {
        match self.format {
            BspFormat::Quake2 => self.write_quake2(),
            _ => self.write_quake_family(),
        }
    }

    fn write_quake_family(&self) -> Result<Vec<u8>, BspError> {
        let format = self.format;
        let short = matches!(format, BspFormat::V29 | BspFormat::GoldSrc30);

        let mut writer = ByteWriter::new();

        writer.append_i32(match format {
            BspFormat::V29 => BSP_VERSION_29,
            BspFormat::GoldSrc30 => BSP_VERSION_30,
            BspFormat::Bsp2 => BSP2_MAGIC,
            _ => BSP2RMQ_MAGIC,
        });

        let directory = LumpDirectory::begin(&mut writer, HEADER_LUMPS);

        directory.write_lump(&mut writer, LUMP_ENTITIES, |w| {
            w.append_string(&write_entities_text(&self.entities));
            w.append_u8(0);
            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_PLANES, |w| {
            for plane in &self.planes {
                w.append_f32(plane.normal.x);
                w.append_f32(plane.normal.y);
                w.append_f32(plane.normal.z);
                w.append_f32(plane.distance);
                w.append_i32(plane.type_ as i32);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_TEXTURES, |w| {
            if self.textures.is_empty() {
                return Ok(());
            }

            let lump_offset = w.get_offset();
            w.append_u32(self.textures.len() as u32);

            let offsets_start = w.get_offset();
            for _ in &self.textures {
                w.append_i32(0); // patched below
            }

            for (idx, texture) in self.textures.iter().enumerate() {
                match texture {
                    None => {
                        w.replace_with_i32(offsets_start + idx * 4, -1);
                    }
                    Some(miptex) => {
                        let miptex_offset = w.get_offset() - lump_offset;
                        w.replace_with_i32(offsets_start + idx * 4, miptex_offset as i32);

                        w.append_fixed_string(&miptex.name, MIPTEX_NAME_LEN);
                        w.append_u32(miptex.width);
                        w.append_u32(miptex.height);
                        for offset in miptex.offsets {
                            w.append_u32(offset);
                        }
                        w.append_u8_slice(&miptex.data);
                    }
                }
            }

            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_VERTICES, |w| {
            for vertex in &self.vertices {
                w.append_f32(vertex.x);
                w.append_f32(vertex.y);
                w.append_f32(vertex.z);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_VISIBILITY, |w| {
            w.append_u8_slice(&self.visibility);
            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_NODES, |w| {
            for node in &self.nodes {
                w.append_i32(node.plane as i32);

                if short {
                    w.append_i16(narrow_i16(node.children[0], "node child", format)?);
                    w.append_i16(narrow_i16(node.children[1], "node child", format)?);
                } else {
                    w.append_i32(node.children[0]);
                    w.append_i32(node.children[1]);
                }

                match format {
                    BspFormat::Bsp2 => {
                        w.append_f32_slice(&node.mins);
                        w.append_f32_slice(&node.maxs);
                    }
                    _ => {
                        for v in node.mins {
                            w.append_i16(bound_i16(v));
                        }
                        for v in node.maxs {
                            w.append_i16(bound_i16(v));
                        }
                    }
                }

                if short {
                    w.append_u16(narrow_u16(node.first_face, "node face index", format)?);
                    w.append_u16(narrow_u16(node.face_count, "node face count", format)?);
                } else {
                    w.append_u32(node.first_face);
                    w.append_u32(node.face_count);
                }
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_TEXINFO, |w| {
            for texinfo in &self.texinfo {
                w.append_f32(texinfo.u.x);
                w.append_f32(texinfo.u.y);
                w.append_f32(texinfo.u.z);
                w.append_f32(texinfo.u_offset);
                w.append_f32(texinfo.v.x);
                w.append_f32(texinfo.v.y);
                w.append_f32(texinfo.v.z);
                w.append_f32(texinfo.v_offset);
                w.append_u32(texinfo.texture_index);
                w.append_u32(texinfo.flags);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_FACES, |w| {
            for face in &self.faces {
                if short {
                    w.append_u16(narrow_u16(face.plane, "face plane index", format)?);
                    w.append_u16(narrow_u16(face.side, "face side", format)?);
                    w.append_i32(face.first_edge);
                    w.append_u16(narrow_u16(face.edge_count, "face edge count", format)?);
                    w.append_u16(narrow_u16(face.texinfo, "face texinfo index", format)?);
                } else {
                    w.append_i32(face.plane as i32);
                    w.append_i32(face.side as i32);
                    w.append_i32(face.first_edge);
                    w.append_i32(face.edge_count as i32);
                    w.append_i32(face.texinfo as i32);
                }

                w.append_u8_slice(&face.styles);
                w.append_i32(face.lightmap_offset);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_LIGHTING, |w| {
            w.append_u8_slice(&self.lighting);
            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_CLIPNODES, |w| {
            for clipnode in &self.clipnodes {
                w.append_i32(clipnode.plane);

                if short {
                    // A dedicated range check; the legacy >0xfff0 sentinel
                    // trick corrupts large maps silently.
                    for child in clipnode.children {
                        let child = i16::try_from(child)
                            .map_err(|_| BspError::ClipnodeRange { value: child })?;
                        w.append_i16(child);
                    }
                } else {
                    w.append_i32(clipnode.children[0]);
                    w.append_i32(clipnode.children[1]);
                }
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_LEAVES, |w| {
            for leaf in &self.leaves {
                w.append_i32(leaf.contents);
                w.append_i32(leaf.vis_offset);

                match format {
                    BspFormat::Bsp2 => {
                        w.append_f32_slice(&leaf.mins);
                        w.append_f32_slice(&leaf.maxs);
                    }
                    _ => {
                        for v in leaf.mins {
                            w.append_i16(bound_i16(v));
                        }
                        for v in leaf.maxs {
                            w.append_i16(bound_i16(v));
                        }
                    }
                }

                if short {
                    w.append_u16(narrow_u16(
                        leaf.first_mark_surface,
                        "leaf marksurface index",
                        format,
                    )?);
                    w.append_u16(narrow_u16(
                        leaf.mark_surface_count,
                        "leaf marksurface count",
                        format,
                    )?);
                } else {
                    w.append_u32(leaf.first_mark_surface);
                    w.append_u32(leaf.mark_surface_count);
                }

                w.append_u8_slice(&leaf.ambient_levels);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_MARKSURFACES, |w| {
            for &mark in &self.mark_surfaces {
                if short {
                    w.append_u16(narrow_u16(mark, "marksurface", format)?);
                } else {
                    w.append_u32(mark);
                }
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_EDGES, |w| {
            for edge in &self.edges {
                if short {
                    w.append_u16(narrow_u16(edge[0], "edge vertex index", format)?);
                    w.append_u16(narrow_u16(edge[1], "edge vertex index", format)?);
                } else {
                    w.append_u32(edge[0]);
                    w.append_u32(edge[1]);
                }
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_SURFEDGES, |w| {
            w.append_i32_slice(&self.surf_edges);
            Ok(())
        })?;

        directory.write_lump(&mut writer, LUMP_MODELS, |w| {
            for model in &self.models {
                w.append_f32(model.mins.x);
                w.append_f32(model.mins.y);
                w.append_f32(model.mins.z);
                w.append_f32(model.maxs.x);
                w.append_f32(model.maxs.y);
                w.append_f32(model.maxs.z);
                w.append_f32(model.origin.x);
                w.append_f32(model.origin.y);
                w.append_f32(model.origin.z);

                for head_node in model.head_nodes {
                    w.append_i32(head_node);
                }

                w.append_i32(model.vis_leaves_count);
                w.append_i32(model.first_face);
                w.append_i32(model.face_count);
            }
            Ok(())
        })?;

        self.write_bspx(&mut writer);

        Ok(writer.data)
    }

    fn write_quake2(&self) -> Result<Vec<u8>, BspError> {
        let format = self.format;
        let mut writer = ByteWriter::new();

        writer.append_i32(Q2_IDENT);
        writer.append_i32(Q2_VERSION);

        let directory = LumpDirectory::begin(&mut writer, Q2_HEADER_LUMPS);

        directory.write_lump(&mut writer, Q2_LUMP_ENTITIES, |w| {
            w.append_string(&write_entities_text(&self.entities));
            w.append_u8(0);
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_PLANES, |w| {
            for plane in &self.planes {
                w.append_f32(plane.normal.x);
                w.append_f32(plane.normal.y);
                w.append_f32(plane.normal.z);
                w.append_f32(plane.distance);
                w.append_i32(plane.type_ as i32);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_VERTICES, |w| {
            for vertex in &self.vertices {
                w.append_f32(vertex.x);
                w.append_f32(vertex.y);
                w.append_f32(vertex.z);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_VISIBILITY, |w| {
            w.append_u8_slice(&self.visibility);
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_NODES, |w| {
            for node in &self.nodes {
                w.append_i32(node.plane as i32);
                w.append_i32(node.children[0]);
                w.append_i32(node.children[1]);

                for v in node.mins {
                    w.append_i16(bound_i16(v));
                }
                for v in node.maxs {
                    w.append_i16(bound_i16(v));
                }

                w.append_u16(narrow_u16(node.first_face, "node face index", format)?);
                w.append_u16(narrow_u16(node.face_count, "node face count", format)?);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_TEXINFO, |w| {
            for texinfo in &self.texinfo {
                w.append_f32(texinfo.u.x);
                w.append_f32(texinfo.u.y);
                w.append_f32(texinfo.u.z);
                w.append_f32(texinfo.u_offset);
                w.append_f32(texinfo.v.x);
                w.append_f32(texinfo.v.y);
                w.append_f32(texinfo.v.z);
                w.append_f32(texinfo.v_offset);
                w.append_i32(texinfo.flags as i32);
                w.append_i32(texinfo.value);
                w.append_fixed_string(&texinfo.texture_name, Q2_TEXTURE_NAME_LEN);
                w.append_i32(texinfo.next_texinfo);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_FACES, |w| {
            for face in &self.faces {
                w.append_u16(narrow_u16(face.plane, "face plane index", format)?);
                w.append_u16(narrow_u16(face.side, "face side", format)?);
                w.append_i32(face.first_edge);
                w.append_u16(narrow_u16(face.edge_count, "face edge count", format)?);
                w.append_u16(narrow_u16(face.texinfo, "face texinfo index", format)?);
                w.append_u8_slice(&face.styles);
                w.append_i32(face.lightmap_offset);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_LIGHTING, |w| {
            w.append_u8_slice(&self.lighting);
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_LEAVES, |w| {
            for leaf in &self.leaves {
                w.append_i32(leaf.contents);
                w.append_i16(narrow_i16(leaf.cluster, "leaf cluster", format)?);
                w.append_i16(narrow_i16(leaf.area, "leaf area", format)?);

                for v in leaf.mins {
                    w.append_i16(bound_i16(v));
                }
                for v in leaf.maxs {
                    w.append_i16(bound_i16(v));
                }

                w.append_u16(narrow_u16(
                    leaf.first_mark_surface,
                    "leaf face index",
                    format,
                )?);
                w.append_u16(narrow_u16(leaf.mark_surface_count, "leaf face count", format)?);
                w.append_u16(narrow_u16(
                    leaf.first_leaf_brush,
                    "leaf brush index",
                    format,
                )?);
                w.append_u16(narrow_u16(leaf.leaf_brush_count, "leaf brush count", format)?);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_LEAFFACES, |w| {
            for &mark in &self.mark_surfaces {
                w.append_u16(narrow_u16(mark, "leafface", format)?);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_LEAFBRUSHES, |w| {
            for &brush in &self.leaf_brushes {
                w.append_u16(narrow_u16(brush, "leafbrush", format)?);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_EDGES, |w| {
            for edge in &self.edges {
                w.append_u16(narrow_u16(edge[0], "edge vertex index", format)?);
                w.append_u16(narrow_u16(edge[1], "edge vertex index", format)?);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_SURFEDGES, |w| {
            w.append_i32_slice(&self.surf_edges);
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_MODELS, |w| {
            for model in &self.models {
                w.append_f32(model.mins.x);
                w.append_f32(model.mins.y);
                w.append_f32(model.mins.z);
                w.append_f32(model.maxs.x);
                w.append_f32(model.maxs.y);
                w.append_f32(model.maxs.z);
                w.append_f32(model.origin.x);
                w.append_f32(model.origin.y);
                w.append_f32(model.origin.z);
                w.append_i32(model.head_nodes[0]);
                w.append_i32(model.first_face);
                w.append_i32(model.face_count);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_BRUSHES, |w| {
            for brush in &self.brushes {
                w.append_i32(brush.first_side);
                w.append_i32(brush.side_count);
                w.append_i32(brush.contents);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_BRUSHSIDES, |w| {
            for side in &self.brush_sides {
                w.append_u16(side.plane);
                w.append_i16(side.texinfo);
            }
            Ok(())
        })?;

        // The unused "pop" lump.
        directory.write_lump(&mut writer, crate::constants::Q2_LUMP_POP, |_| Ok(()))?;

        directory.write_lump(&mut writer, Q2_LUMP_AREAS, |w| {
            for area in &self.areas {
                w.append_i32(area.portal_count);
                w.append_i32(area.first_portal);
            }
            Ok(())
        })?;

        directory.write_lump(&mut writer, Q2_LUMP_AREAPORTALS, |w| {
            for portal in &self.area_portals {
                w.append_i32(portal.portal_num);
                w.append_i32(portal.other_area);
            }
            Ok(())
        })?;

        self.write_bspx(&mut writer);

        Ok(writer.data)
    }

    fn write_bspx(&self, writer: &mut ByteWriter) {
        if self.bspx.is_empty() {
            return;
        }

        writer.pad_to_4();
        writer.append_u8_slice(BSPX_MAGIC);
        writer.append_u32(self.bspx.len() as u32);

        let directory_start = writer.get_offset();
        for lump in &self.bspx {
            writer.append_fixed_string(&lump.name, BSPX_NAME_LEN);
            writer.append_u32(0); // fileofs, patched
            writer.append_u32(lump.data.len() as u32);
        }

        for (idx, lump) in self.bspx.iter().enumerate() {
            writer.pad_to_4();
            let entry = directory_start + idx * (BSPX_NAME_LEN + 8);
            writer.replace_with_u32(entry + BSPX_NAME_LEN, writer.get_offset() as u32);
            writer.append_u8_slice(&lump.data);
        }
    }
}

#[cfg(test)]
mod test {
    use glam::Vec3;

    use super::*;
    use crate::types::{
        Entity, Face, Leaf, Model, Node, Plane, PlaneType, TexInfo,
    };

    fn tiny_bsp(format: BspFormat) -> Bsp {
        let mut worldspawn = Entity::new();
        worldspawn.insert("classname", "worldspawn");

        Bsp {
            format,
            entities: vec![worldspawn],
            planes: vec![Plane {
                normal: Vec3::Z,
                distance: 64.,
                type_: PlaneType::Z,
            }],
            vertices: vec![
                Vec3::new(0., 0., 64.),
                Vec3::new(64., 0., 64.),
                Vec3::new(64., 64., 64.),
                Vec3::new(0., 64., 64.),
            ],
            nodes: vec![Node {
                plane: 0,
                children: [-1, -2],
                mins: [-64., -64., -64.],
                maxs: [64., 64., 64.],
                first_face: 0,
                face_count: 1,
            }],
            texinfo: vec![TexInfo {
                u: Vec3::X,
                u_offset: 0.,
                v: Vec3::Y,
                v_offset: 0.,
                texture_index: 0,
                flags: 0,
                value: 0,
                texture_name: String::new(),
                next_texinfo: -1,
            }],
            faces: vec![Face {
                plane: 0,
                side: 0,
                first_edge: 0,
                edge_count: 4,
                texinfo: 0,
                styles: [0, 255, 255, 255],
                lightmap_offset: -1,
            }],
            leaves: vec![
                Leaf {
                    contents: -1,
                    vis_offset: -1,
                    mins: [-64., -64., -64.],
                    maxs: [64., 64., 64.],
                    first_mark_surface: 0,
                    mark_surface_count: 1,
                    ambient_levels: [0; 4],
                    cluster: -1,
                    area: 0,
                    first_leaf_brush: 0,
                    leaf_brush_count: 0,
                },
                Leaf {
                    contents: -2,
                    vis_offset: -1,
                    mins: [-64., -64., -64.],
                    maxs: [64., 64., 64.],
                    first_mark_surface: 0,
                    mark_surface_count: 0,
                    ambient_levels: [0; 4],
                    cluster: -1,
                    area: 0,
                    first_leaf_brush: 0,
                    leaf_brush_count: 0,
                },
            ],
            mark_surfaces: vec![0],
            edges: vec![[0, 0], [0, 1], [1, 2], [2, 3], [3, 0]],
            surf_edges: vec![1, 2, 3, 4],
            models: vec![Model {
                mins: Vec3::splat(-64.),
                maxs: Vec3::splat(64.),
                origin: Vec3::ZERO,
                head_nodes: [0, -1, -1, -1],
                vis_leaves_count: 1,
                first_face: 0,
                face_count: 1,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn v29_round_trip_bytes() {
        let bsp = tiny_bsp(BspFormat::V29);

        let bytes = bsp.write_to_bytes().unwrap();
        let parsed = Bsp::from_bytes(&bytes).unwrap();
        let bytes_again = parsed.write_to_bytes().unwrap();

        assert_eq!(bytes, bytes_again);
    }

    #[test]
    fn dialect_conversion_round_trip() {
        let bsp = tiny_bsp(BspFormat::V29);
        let v29_bytes = bsp.write_to_bytes().unwrap();

        let bsp2 = bsp.convert_to(BspFormat::Bsp2).unwrap();
        let bsp2_bytes = bsp2.write_to_bytes().unwrap();
        assert_ne!(v29_bytes, bsp2_bytes);

        let back = Bsp::from_bytes(&bsp2_bytes)
            .unwrap()
            .convert_to(BspFormat::V29)
            .unwrap();

        assert_eq!(back.write_to_bytes().unwrap(), v29_bytes);
    }

    #[test]
    fn bsp2_magic_header() {
        let bsp = tiny_bsp(BspFormat::Bsp2);
        let bytes = bsp.write_to_bytes().unwrap();

        assert_eq!(&bytes[0..4], b"BSP2");
    }

    #[test]
    fn overflow_reported_not_wrapped() {
        let mut bsp = tiny_bsp(BspFormat::V29);
        bsp.faces[0].texinfo = 70_000;

        match bsp.write_to_bytes() {
            Err(BspError::FormatOverflow { what, .. }) => {
                assert_eq!(what, "face texinfo index")
            }
            other => panic!("expected overflow, got {:?}", other.map(|b| b.len())),
        }

        assert!(bsp.convert_to(BspFormat::Bsp2).unwrap().write_to_bytes().is_ok());
    }

    #[test]
    fn bspx_lumps_survive() {
        let mut bsp = tiny_bsp(BspFormat::V29);
        bsp.set_bspx_lump("LMSHIFT", vec![4u8]);
        bsp.set_bspx_lump("RGBLIGHTING", vec![1, 2, 3, 4, 5, 6]);

        let bytes = bsp.write_to_bytes().unwrap();
        let parsed = Bsp::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.bspx_lump("LMSHIFT"), Some(&[4u8][..]));
        assert_eq!(parsed.bspx_lump("RGBLIGHTING"), Some(&[1u8, 2, 3, 4, 5, 6][..]));
    }

    #[test]
    fn quake2_round_trip() {
        let mut bsp = tiny_bsp(BspFormat::Quake2);
        bsp.texinfo[0].texture_name = "e1u1/floor1_3".to_string();
        bsp.leaves[0].cluster = 0;

        let bytes = bsp.write_to_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"IBSP");

        let parsed = Bsp::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.texinfo[0].texture_name, "e1u1/floor1_3");
        assert_eq!(parsed.write_to_bytes().unwrap(), bytes);
    }
}
