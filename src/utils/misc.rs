use std::path::{Path, PathBuf};

pub fn with_extension(path: &Path, ext: &str) -> PathBuf {
    let mut out = path.to_path_buf();
    out.set_extension(ext);
    out
}

pub fn maybe_add_extension_to_string(s: &str, ext: &str) -> String {
    let ext_with_dot = format!(".{}", ext);

    if s.ends_with(&ext_with_dot) {
        s.to_string()
    } else {
        format!("{}.{}", s, ext)
    }
}

/// Epair vectors are space separated: "x y z".
pub fn parse_vec3(s: &str) -> Option<glam::DVec3> {
    let mut parts = s.split_whitespace().map(|p| p.parse::<f64>());

    let x = parts.next()?.ok()?;
    let y = parts.next()?.ok()?;
    let z = parts.next()?.ok()?;

    Some(glam::DVec3::new(x, y, z))
}

/// A lone number is a yaw angle; "x y z" is a full mangle.
pub fn parse_angles(s: &str) -> Option<glam::DVec3> {
    if let Some(v) = parse_vec3(s) {
        return Some(v);
    }

    let yaw = s.trim().parse::<f64>().ok()?;
    Some(glam::DVec3::new(0., yaw, 0.))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vec3_parse() {
        assert_eq!(
            parse_vec3("-80 -88 60").unwrap(),
            glam::DVec3::new(-80., -88., 60.)
        );
        assert!(parse_vec3("1 2").is_none());
    }

    #[test]
    fn angle_forms() {
        assert_eq!(parse_angles("90").unwrap(), glam::DVec3::new(0., 90., 0.));
        assert_eq!(
            parse_angles("-45 30 0").unwrap(),
            glam::DVec3::new(-45., 30., 0.)
        );
    }
}
