use nom::{
    bytes::complete::{tag, take_till},
    character::complete::multispace0,
    combinator::all_consuming,
    multi::many0,
    sequence::{delimited, preceded, terminated, tuple},
};

use crate::types::{Entity, SResult};

pub fn quoted_text(i: &str) -> SResult<&str> {
    terminated(preceded(tag("\""), take_till(|c| c == '\"')), tag("\""))(i)
}

fn parse_entity(i: &str) -> SResult<Entity> {
    let pair = |i| {
        tuple((
            delimited(multispace0, quoted_text, multispace0),
            delimited(multispace0, quoted_text, multispace0),
        ))(i)
    };

    let (i, list) = delimited(
        tuple((multispace0, tag("{"))),
        many0(pair),
        tuple((multispace0, tag("}"), multispace0)),
    )(i)?;

    Ok((
        i,
        list.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    ))
}

/// The entity lump is plain text; parse it as a string and drop the
/// trailing null some compilers append.
pub fn parse_entities_text(i: &[u8]) -> Option<Vec<Entity>> {
    let s = String::from_utf8_lossy(i).replace(std::char::REPLACEMENT_CHARACTER, "");
    let s = s.trim_end_matches('\0');

    let (_, entities) = all_consuming(terminated(many0(parse_entity), multispace0))(s).ok()?;

    Some(entities)
}

pub fn write_entities_text(entities: &[Entity]) -> String {
    let mut out = String::new();

    for entity in entities {
        out += "{\n";
        for (key, value) in entity.iter() {
            out += &format!("\"{}\" \"{}\"\n", key, value);
        }
        out += "}\n";
    }

    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn entities_round_trip() {
        let text = "{\n\"classname\" \"worldspawn\"\n\"wad\" \"quake.wad\"\n}\n{\n\"classname\" \"light\"\n\"origin\" \"0 0 64\"\n}\n";

        let entities = parse_entities_text(text.as_bytes()).unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].get("wad"), Some("quake.wad"));

        assert_eq!(write_entities_text(&entities), text);
    }

    #[test]
    fn trailing_null_tolerated() {
        let text = "{\n\"classname\" \"worldspawn\"\n}\n\0";

        let entities = parse_entities_text(text.as_bytes()).unwrap();
        assert_eq!(entities.len(), 1);
    }
}
