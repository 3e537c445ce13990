//! Parser and writer for Quake-family .map brush files.
//!
//! Four texture-alignment syntaxes are recognized automatically, per face:
//! Standard (QuakeEd), Valve 220, Brush Primitives and QuArK TX1/TX2.
//! Faces keep their raw plane points plus the decoded alignment so a map can
//! be written back in any syntax via [`axes`] conversions.

use std::{
    fs::OpenOptions,
    io::{self, BufWriter, Write},
    path::Path,
};

use glam::{DVec2, DVec3, DVec4};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_till},
    character::complete::{multispace0, one_of, space0},
    combinator::{all_consuming, map, opt, peek, recognize},
    multi::{fold_many1, many0, many1, many_m_n},
    number::complete::double as _double,
    sequence::{delimited, preceded, terminated, tuple},
    IResult as _IResult,
};

pub mod axes;
pub mod error;

pub use error::MapError;

/// Q1/WAD texture name limit.
pub const MAX_TEXTURE_NAME: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarkStyle {
    /// `//TX1`: S from pt3-pt1, T from pt2-pt1.
    Type1,
    /// `//TX2`: the reverse.
    Type2,
}

/// Standard QuakeEd texture placement. Axes come from the face's dominant
/// cardinal direction (see [`axes::texture_axis_from_plane`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardAlignment {
    pub shift: DVec2,
    pub rotation: f64,
    pub scale: DVec2,
}

/// Valve 220 placement with explicit world-space axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Valve220Alignment {
    /// Ux Uy Uz Ushift
    pub u: DVec4,
    /// Vx Vy Vz Vshift
    pub v: DVec4,
    /// Carried for round-tripping; the axes already encode it.
    pub rotation: f64,
    pub scale: DVec2,
}

/// Brush Primitives 2x3 texture matrix in the plane's orthonormal basis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrushPrimitivesAlignment {
    pub rows: [[f64; 3]; 2],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextureAlignment {
    Standard(StandardAlignment),
    Valve220(Valve220Alignment),
    BrushPrimitives(BrushPrimitivesAlignment),
    /// Axes implied by the three plane points with the 1/128 QuArK scaling.
    /// The standard-looking numeric fields on the line are ignored.
    Quark(QuarkStyle),
}

/// Quake II trailing `contents flags value` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceExtension {
    pub contents: i32,
    pub flags: i32,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrushPlane {
    pub p1: DVec3,
    pub p2: DVec3,
    pub p3: DVec3,
    pub texture_name: String,
    pub alignment: TextureAlignment,
    pub extension: Option<SurfaceExtension>,
}

impl BrushPlane {
    /// Plane normal from the three points, unnormalized.
    /// Quake winds the points clockwise seen from the front of the face.
    pub fn raw_normal(&self) -> DVec3 {
        (self.p3 - self.p1).cross(self.p2 - self.p1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Brush {
    pub planes: Vec<BrushPlane>,
}

/// Epairs in file order. Entity text is order-sensitive downstream (light
/// styles are assigned by source order), so no hash map here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    pairs: Vec<(String, String)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value.into(),
            None => self.pairs.push((key, value.into())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
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

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    // All entities have attributes.
    pub attributes: Attributes,
    pub brushes: Option<Vec<Brush>>,
}

impl Entity {
    pub fn classname(&self) -> &str {
        self.attributes.get("classname").unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    pub tb_header: Option<Vec<String>>,
    pub entities: Vec<Entity>,
}

impl Map {
    pub fn from_text(text: &str) -> Result<Self, MapError> {
        match parse_map(text) {
            Ok((_, res)) => {
                res.validate_texture_names()?;
                Ok(res)
            }
            Err(err) => {
                let rest = match &err {
                    nom::Err::Error(e) | nom::Err::Failure(e) => e.input,
                    nom::Err::Incomplete(_) => "",
                };
                Err(MapError::Parse {
                    line: line_of(text, rest),
                    near: rest.chars().take(24).collect(),
                })
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| MapError::Io {
            source,
            path: path.to_path_buf(),
        })?;

        Self::from_text(&text)
    }

    pub fn write_to_string(&self) -> String {
        let mut out = String::new();

        if let Some(tb_header) = &self.tb_header {
            for s in tb_header {
                out += &format!("//{}\n", s);
            }
        }

        for (entity_index, entity) in self.entities.iter().enumerate() {
            out += &format!("// entity {}\n{{\n", entity_index);

            for (key, value) in entity.attributes.iter() {
                out += &format!("\"{}\" \"{}\"\n", key, value);
            }

            if let Some(brushes) = &entity.brushes {
                for (brush_index, brush) in brushes.iter().enumerate() {
                    out += &format!("// brush {}\n{{\n", brush_index);

                    for plane in &brush.planes {
                        out += &write_brush_plane(plane);
                        out += "\n";
                    }

                    out += "}\n";
                }
            }

            out += "}\n";
        }

        out
    }

    pub fn write(&self, file_name: impl AsRef<Path>) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(file_name.as_ref())?;
        let mut file = BufWriter::new(file);

        file.write_all(self.write_to_string().as_bytes())?;
        file.flush()
    }

    pub fn worldspawn(&self) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|entity| entity.classname() == "worldspawn")
    }

    /// WAD-referencing faces cap names at 15 chars; Q2/BP faces carry
    /// path-style names up to 32.
    fn validate_texture_names(&self) -> Result<(), MapError> {
        for entity in &self.entities {
            let Some(brushes) = &entity.brushes else {
                continue;
            };

            for brush in brushes {
                for face in &brush.planes {
                    let q2_style = face.extension.is_some()
                        || matches!(face.alignment, TextureAlignment::BrushPrimitives(_));
                    let limit = if q2_style { 32 } else { MAX_TEXTURE_NAME };

                    if face.texture_name.len() > limit {
                        return Err(MapError::TextureName {
                            name: face.texture_name.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

fn line_of(full: &str, rest: &str) -> usize {
    let consumed = full.len() - rest.len();
    full[..consumed].matches('\n').count() + 1
}

fn format_number(v: f64) -> String {
    // Integral values print without a trailing ".0", the way editors write them.
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

fn write_point(p: DVec3) -> String {
    format!(
        "( {} {} {} )",
        format_number(p.x),
        format_number(p.y),
        format_number(p.z)
    )
}

fn write_brush_plane(plane: &BrushPlane) -> String {
    let mut line = format!(
        "{} {} {}",
        write_point(plane.p1),
        write_point(plane.p2),
        write_point(plane.p3),
    );

    match &plane.alignment {
        TextureAlignment::Standard(standard) => {
            line += &format!(
                " {} {} {} {} {} {}",
                plane.texture_name,
                format_number(standard.shift.x),
                format_number(standard.shift.y),
                format_number(standard.rotation),
                format_number(standard.scale.x),
                format_number(standard.scale.y),
            );
        }
        TextureAlignment::Valve220(valve) => {
            line += &format!(
                " {} [ {} {} {} {} ] [ {} {} {} {} ] {} {} {}",
                plane.texture_name,
                format_number(valve.u.x),
                format_number(valve.u.y),
                format_number(valve.u.z),
                format_number(valve.u.w),
                format_number(valve.v.x),
                format_number(valve.v.y),
                format_number(valve.v.z),
                format_number(valve.v.w),
                format_number(valve.rotation),
                format_number(valve.scale.x),
                format_number(valve.scale.y),
            );
        }
        TextureAlignment::BrushPrimitives(bp) => {
            line = format!(
                "{} {} {} ( ( {} {} {} ) ( {} {} {} ) ) {}",
                write_point(plane.p1),
                write_point(plane.p2),
                write_point(plane.p3),
                format_number(bp.rows[0][0]),
                format_number(bp.rows[0][1]),
                format_number(bp.rows[0][2]),
                format_number(bp.rows[1][0]),
                format_number(bp.rows[1][1]),
                format_number(bp.rows[1][2]),
                plane.texture_name,
            );
        }
        TextureAlignment::Quark(style) => {
            line += &format!(
                " {} 0 0 0 1 1 //TX{}",
                plane.texture_name,
                match style {
                    QuarkStyle::Type1 => 1,
                    QuarkStyle::Type2 => 2,
                }
            );
        }
    }

    if let Some(ext) = &plane.extension {
        line += &format!(" {} {} {}", ext.contents, ext.flags, ext.value);
    }

    line
}

type IResult<'a, T> = _IResult<&'a str, T>;

fn take_comment_line(i: &str) -> IResult<&str> {
    terminated(
        preceded(tuple((space0, tag("//"))), take_till(|c| c == '\n')),
        multispace0,
    )(i)
}

fn take_tb_header(i: &str) -> IResult<Vec<String>> {
    many_m_n(0, 2, map(take_comment_line, |i| i.to_string()))(i)
}

// Many 0 because it doesn't necessary have it every time.
fn discard_comment_lines(i: &str) -> IResult<&str> {
    map(many0(take_comment_line), |_| "")(i)
}

fn signed_double(i: &str) -> IResult<f64> {
    map(recognize(preceded(opt(tag("-")), _double)), |what: &str| {
        what.parse().unwrap()
    })(i)
}

pub fn double(i: &str) -> IResult<f64> {
    preceded(space0, signed_double)(i)
}

fn signed_integer(i: &str) -> IResult<i32> {
    map(double, |v| v as i32)(i)
}

fn between_line_bracket<'a, T>(
    f: impl FnMut(&'a str) -> IResult<T>,
) -> impl FnMut(&'a str) -> IResult<'a, T> {
    terminated(
        preceded(tuple((space0, tag("{"), multispace0)), f),
        tuple((space0, tag("}"), multispace0)),
    )
}

fn quoted_text(i: &str) -> IResult<&str> {
    terminated(preceded(tag("\""), take_till(|c| c == '"')), tag("\""))(i)
}

// For brushes
// These ones take in space0 at the end
// just to make sure that the next thing we read is a value.
fn parse_plane_coordinate(i: &str) -> IResult<DVec3> {
    terminated(
        preceded(
            tuple((space0, tag("("), space0)),
            map(tuple((double, double, double)), |(x, y, z)| {
                DVec3::new(x, y, z)
            }),
        ),
        tuple((space0, tag(")"), space0)),
    )(i)
}

fn parse_plane_uv(i: &str) -> IResult<DVec4> {
    terminated(
        preceded(
            tuple((space0, tag("["), space0)),
            map(
                tuple((double, double, double, double)),
                |(x, y, z, offset)| DVec4::new(x, y, z, offset),
            ),
        ),
        tuple((space0, tag("]"), space0)),
    )(i)
}

// (( a b c )( d e f )) before the texture name
fn parse_brush_prim_matrix(i: &str) -> IResult<BrushPrimitivesAlignment> {
    let row = |i| {
        terminated(
            preceded(
                tuple((space0, tag("("), space0)),
                tuple((double, double, double)),
            ),
            tuple((space0, tag(")"), space0)),
        )(i)
    };

    map(
        delimited(
            tuple((space0, tag("("), space0)),
            tuple((row, row)),
            tuple((space0, tag(")"), space0)),
        ),
        |((a, b, c), (d, e, f))| BrushPrimitivesAlignment {
            rows: [[a, b, c], [d, e, f]],
        },
    )(i)
}

fn texture_name(i: &str) -> IResult<&str> {
    preceded(space0, alt((quoted_text, is_not(" \t\r\n"))))(i)
}

fn parse_surface_extension(i: &str) -> IResult<SurfaceExtension> {
    map(
        tuple((signed_integer, signed_integer, signed_integer)),
        |(contents, flags, value)| SurfaceExtension {
            contents,
            flags,
            value,
        },
    )(i)
}

// //TX1 or //TX2 at the end of a QuArK face line
fn parse_quark_marker(i: &str) -> IResult<QuarkStyle> {
    map(
        preceded(tuple((space0, tag("//TX"))), one_of("12")),
        |c| match c {
            '1' => QuarkStyle::Type1,
            _ => QuarkStyle::Type2,
        },
    )(i)
}

fn parse_brush_plane(i: &str) -> IResult<BrushPlane> {
    let (i, (p1, p2, p3)) = tuple((
        parse_plane_coordinate,
        parse_plane_coordinate,
        parse_plane_coordinate,
    ))(i)?;

    // Brush Primitives carries the texture matrix before the name.
    if let (i, Some(bp)) = opt(parse_brush_prim_matrix)(i)? {
        let (i, name) = texture_name(i)?;
        let (i, extension) = opt(parse_surface_extension)(i)?;

        return Ok((
            i,
            BrushPlane {
                p1,
                p2,
                p3,
                texture_name: name.to_string(),
                alignment: TextureAlignment::BrushPrimitives(bp),
                extension,
            },
        ));
    }

    let (i, name) = texture_name(i)?;

    // Valve 220 announces itself with a bracket.
    if peek::<_, _, nom::error::Error<&str>, _>(preceded(space0, tag("[")))(i).is_ok() {
        let (i, (u, v, rotation, u_scale, v_scale)) =
            tuple((parse_plane_uv, parse_plane_uv, double, double, double))(i)?;
        let (i, extension) = opt(parse_surface_extension)(i)?;

        return Ok((
            i,
            BrushPlane {
                p1,
                p2,
                p3,
                texture_name: name.to_string(),
                alignment: TextureAlignment::Valve220(Valve220Alignment {
                    u,
                    v,
                    rotation,
                    scale: DVec2::new(u_scale, v_scale),
                }),
                extension,
            },
        ));
    }

    let (i, (shift_s, shift_t, rotation, scale_s, scale_t)) =
        tuple((double, double, double, double, double))(i)?;
    let (i, extension) = opt(parse_surface_extension)(i)?;
    let (i, quark) = opt(parse_quark_marker)(i)?;

    let alignment = match quark {
        Some(style) => TextureAlignment::Quark(style),
        None => TextureAlignment::Standard(StandardAlignment {
            shift: DVec2::new(shift_s, shift_t),
            rotation,
            scale: DVec2::new(scale_s, scale_t),
        }),
    };

    Ok((
        i,
        BrushPlane {
            p1,
            p2,
            p3,
            texture_name: name.to_string(),
            alignment,
            extension,
        },
    ))
}

fn parse_brush(i: &str) -> IResult<Brush> {
    map(
        many1(delimited(
            discard_comment_lines,
            parse_brush_plane,
            multispace0,
        )),
        |planes| Brush { planes },
    )(i)
}

fn parse_brushes(i: &str) -> IResult<Vec<Brush>> {
    many1(delimited(
        discard_comment_lines,
        between_line_bracket(parse_brush),
        discard_comment_lines,
    ))(i)
}

// For attributes
fn parse_attribute(i: &str) -> IResult<(&str, &str)> {
    tuple((quoted_text, preceded(space0, quoted_text)))(i)
}

fn parse_attributes(i: &str) -> IResult<Attributes> {
    fold_many1(
        delimited(discard_comment_lines, parse_attribute, multispace0),
        Attributes::new,
        |mut acc: Attributes, (key, value)| {
            acc.insert(key.to_owned(), value.to_owned());
            acc
        },
    )(i)
}

// For map
fn parse_entity(i: &str) -> IResult<Entity> {
    map(
        tuple((parse_attributes, opt(parse_brushes))),
        |(attributes, brushes)| Entity {
            attributes,
            brushes,
        },
    )(i)
}

fn parse_entities(i: &str) -> IResult<Vec<Entity>> {
    many1(delimited(
        discard_comment_lines,
        between_line_bracket(parse_entity),
        discard_comment_lines,
    ))(i)
}

fn parse_map(i: &str) -> IResult<Map> {
    map(
        all_consuming(tuple((opt(take_tb_header), parse_entities))),
        |(tb_header, entities)| Map {
            tb_header,
            entities,
        },
    )(i)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inside_quote() {
        let i = "\"heyhey\"";

        let (rest, a) = quoted_text(i).unwrap();
        assert_eq!(a, "heyhey");
        assert_eq!(rest, "");
    }

    #[test]
    fn valve_face_parse() {
        let i = "( -120 -136 144 ) ( -120 -136 136 ) ( -120 56 144 ) NULL \
                 [ 2.220446049250313e-16 0 -1 24 ] [ 0 -1 0 0 ] 0 1 1";

        let (rest, face) = parse_brush_plane(i).unwrap();
        assert!(rest.is_empty());
        assert_eq!(face.p1, DVec3::new(-120., -136., 144.));
        assert_eq!(face.texture_name, "NULL");

        match face.alignment {
            TextureAlignment::Valve220(v) => {
                assert_eq!(v.u.x, 2.220446049250313e-16);
                assert_eq!(v.u.w, 24.);
                assert_eq!(v.scale, DVec2::ONE);
            }
            _ => panic!("not valve 220"),
        }
    }

    #[test]
    fn standard_face_parse() {
        let i = "( -64 -64 -16 ) ( -64 -63 -16 ) ( -64 -64 -15 ) CITY2_5 16 96 0 1 1";

        let (rest, face) = parse_brush_plane(i).unwrap();
        assert!(rest.is_empty());
        assert_eq!(face.texture_name, "CITY2_5");

        match face.alignment {
            TextureAlignment::Standard(s) => {
                assert_eq!(s.shift, DVec2::new(16., 96.));
                assert_eq!(s.rotation, 0.);
            }
            _ => panic!("not standard"),
        }
    }

    #[test]
    fn quake2_face_parse() {
        let i = "( 0 0 0 ) ( 0 1 0 ) ( 0 0 1 ) e1u1/floor1_3 0 0 0 1 1 1 512 700";

        let (_, face) = parse_brush_plane(i).unwrap();
        assert_eq!(face.texture_name, "e1u1/floor1_3");

        let ext = face.extension.unwrap();
        assert_eq!(ext.contents, 1);
        assert_eq!(ext.flags, 512);
        assert_eq!(ext.value, 700);
    }

    #[test]
    fn quark_face_parse() {
        let i = "( 0 0 0 ) ( 128 0 0 ) ( 0 128 0 ) tech01 0 0 0 1 1 //TX1";

        let (_, face) = parse_brush_plane(i).unwrap();
        assert_eq!(
            face.alignment,
            TextureAlignment::Quark(QuarkStyle::Type1)
        );
    }

    #[test]
    fn brush_primitives_face_parse() {
        let i = "( 64 64 16 ) ( 64 64 17 ) ( 64 65 16 ) ( ( 0.0078125 0 0 ) ( 0 0.0078125 0 ) ) common/caulk 0 0 0";

        let (_, face) = parse_brush_plane(i).unwrap();
        assert_eq!(face.texture_name, "common/caulk");

        match face.alignment {
            TextureAlignment::BrushPrimitives(bp) => {
                assert_eq!(bp.rows[0][0], 0.0078125);
                assert_eq!(bp.rows[1][1], 0.0078125);
            }
            _ => panic!("not brush primitives"),
        }

        let ext = face.extension.unwrap();
        assert_eq!(ext.contents, 0);
    }

    #[test]
    fn brushes_parse() {
        let i = "\
// brush 4
{
( -120 -136 144 ) ( -120 -136 136 ) ( -120 56 144 ) NULL [ 2.220446049250313e-16 0 -1 24 ] [ 0 -1 0 0 ] 0 1 1
( 56 -136 144 ) ( 56 -136 136 ) ( -120 -136 144 ) NULL [ 1 0 0 0 ] [ 0 -2.220446049250313e-16 1 -8 ] 0 1 1
( 56 56 136 ) ( -120 56 136 ) ( 56 -136 136 ) sky [ 0 -1 0 0 ] [ -1 0 -2.220446049250313e-16 -256 ] 0 1 1
( 56 56 144 ) ( 56 -136 144 ) ( -120 56 144 ) NULL [ 1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( -120 56 144 ) ( -120 56 136 ) ( 56 56 144 ) NULL [ 1 0 0 0 ] [ 0 -2.220446049250313e-16 -1 24 ] 0 1 1
( 56 56 144 ) ( 56 56 136 ) ( 56 -136 144 ) NULL [ 2.220446049250313e-16 0 1 -24 ] [ 0 -1 0 0 ] 0 1 1
}
// brush 5
{
( -120 56 -16 ) ( -120 56 -8 ) ( -120 -136 -16 ) NULL [ 2.220446049250313e-16 0 -1 24 ] [ 0 -1 0 0 ] 0 1 1
( -120 -136 -16 ) ( -120 -136 -8 ) ( 56 -136 -16 ) NULL [ 1 0 0 0 ] [ 0 -2.220446049250313e-16 1 -8 ] 0 1 1
( -120 56 -16 ) ( -120 -136 -16 ) ( 56 56 -16 ) NULL [ 1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( -120 -136 -8 ) ( -120 56 -8 ) ( 56 -136 -8 ) tf [ -1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( 56 56 -16 ) ( 56 56 -8 ) ( -120 56 -16 ) NULL [ 1 0 0 0 ] [ 0 -2.220446049250313e-16 -1 24 ] 0 1 1
( 56 -136 -16 ) ( 56 -136 -8 ) ( 56 56 -16 ) NULL [ 2.220446049250313e-16 0 1 -24 ] [ 0 -1 0 0 ] 0 1 1
}
";

        let (_, a) = parse_brushes(i).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].planes[0].p1, DVec3::new(-120., -136., 144.));
        assert_eq!(a[0].planes[0].texture_name, "NULL");
    }

    #[test]
    fn entities_parse() {
        let i = "\
{
\"classname\" \"info_player_start\"
\"spawnflags\" \"0\"
\"angles\" \"0 0 0\"
\"origin\" \"-80 -88 60\"
}";

        let (rest, a) = parse_entities(i).unwrap();
        assert_eq!(rest, "");
        assert_eq!(a.len(), 1);

        let ent = &a[0];

        assert!(ent.brushes.is_none());
        assert_eq!(ent.attributes.len(), 4);
        assert_eq!(ent.attributes.get("origin").unwrap(), "-80 -88 60");
    }

    #[test]
    fn comment_line_parse() {
        let i = "\
// A song for the broken heart
// Eh
// {}
// \"\"";

        let (rest, _) = discard_comment_lines(i).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn file_parse() {
        let i = "\
// Game: Half-Life
// Format: Valve
// entity 0
{
\"mapversion\" \"220\"
\"wad\" \"/home/khang/map_compiler/sdhlt.wad;/home/khang/map_compiler/devtextures.wad\"
\"classname\" \"worldspawn\"
// brush 0
{
( -64 -64 -16 ) ( -64 -63 -16 ) ( -64 -64 -15 ) __TB_empty [ 0 -1 0 0 ] [ 0 0 -1 0 ] 0 1 1
( -64 -64 -16 ) ( -64 -64 -15 ) ( -63 -64 -16 ) __TB_empty [ 1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( -64 -64 -16 ) ( -63 -64 -16 ) ( -64 -63 -16 ) __TB_empty [ -1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( 64 64 192 ) ( 64 65 192 ) ( 65 64 192 ) __TB_empty [ 1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( 64 64 16 ) ( 65 64 16 ) ( 64 64 17 ) __TB_empty [ -1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( 64 64 16 ) ( 64 64 17 ) ( 64 65 16 ) __TB_empty [ 0 1 0 0 ] [ 0 0 -1 0 ] 0 1 1
}
}

";

        let (rest, a) = parse_map(i).unwrap();

        assert!(rest.is_empty());
        assert_eq!(a.entities.len(), 1);

        let ent = &a.entities[0];

        assert_eq!(ent.attributes.len(), 3);
        assert!(ent.brushes.is_some());

        let brushes = ent.brushes.as_ref().unwrap();
        assert_eq!(brushes.len(), 1);

        let brush = &brushes[0];
        assert_eq!(brush.planes[3].p2, DVec3::new(64., 65., 192.));
        assert_eq!(brush.planes[3].texture_name, "__TB_empty");
    }

    #[test]
    fn write_read_round_trip() {
        let i = "\
{
\"classname\" \"worldspawn\"
{
( -64 -64 -16 ) ( -64 -63 -16 ) ( -64 -64 -15 ) wall [ 0 -1 0 4 ] [ 0 0 -1 8 ] 0 1 1
( -64 -64 -16 ) ( -64 -64 -15 ) ( -63 -64 -16 ) wall [ 1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( -64 -64 -16 ) ( -63 -64 -16 ) ( -64 -63 -16 ) floor3 16 96 45 0.5 2 1 0 0
( 64 64 192 ) ( 64 65 192 ) ( 65 64 192 ) wall [ 1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( 64 64 16 ) ( 65 64 16 ) ( 64 64 17 ) wall [ -1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( 64 64 16 ) ( 64 64 17 ) ( 64 65 16 ) wall [ 0 1 0 0 ] [ 0 0 -1 0 ] 0 1 1
}
}
";

        let first = Map::from_text(i).unwrap();
        let text = first.write_to_string();
        let second = Map::from_text(&text).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn overlong_texture_name_rejected() {
        let i = "\
{
\"classname\" \"worldspawn\"
{
( -64 -64 -16 ) ( -64 -63 -16 ) ( -64 -64 -15 ) texture_name_way_too_long 0 0 0 1 1
( -64 -64 -16 ) ( -64 -64 -15 ) ( -63 -64 -16 ) wall 0 0 0 1 1
( -64 -64 -16 ) ( -63 -64 -16 ) ( -64 -63 -16 ) wall 0 0 0 1 1
( 64 64 192 ) ( 64 65 192 ) ( 65 64 192 ) wall 0 0 0 1 1
( 64 64 16 ) ( 65 64 16 ) ( 64 64 17 ) wall 0 0 0 1 1
( 64 64 16 ) ( 64 64 17 ) ( 64 65 16 ) wall 0 0 0 1 1
}
}
";

        match Map::from_text(i) {
            Err(MapError::TextureName { name }) => {
                assert_eq!(name, "texture_name_way_too_long")
            }
            other => panic!("expected texture name error, got {:?}", other),
        }
    }

    #[test]
    fn error_carries_line() {
        let i = "{\n\"classname\" \"worldspawn\"\n{\n( 0 0 0 ( 1 0 0 ) ( 0 1 0 ) wall 0 0 0 1 1\n}\n}\n";

        let err = Map::from_text(i).unwrap_err();
        match err {
            MapError::Parse { line, .. } => assert!(line >= 3),
            _ => panic!("expected parse error"),
        }
    }
}
