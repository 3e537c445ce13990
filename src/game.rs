//! Per-game capability sets. The compiler core never branches on a game
//! name; everything it needs to know lives in a [`GameDef`] passed by
//! reference through the pipeline.

use glam::DVec3;

use bsp::{BspFormat, LeafContents, Q2Contents};

use crate::modules::qbsp::Contents;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameId {
    Quake,
    Hexen2,
    HalfLife,
    Quake2,
}

/// A collision hull: brushes are inflated by the box when building it.
#[derive(Debug, Clone, Copy)]
pub struct HullSize {
    pub mins: DVec3,
    pub maxs: DVec3,
}

const fn hull(mins: [f64; 3], maxs: [f64; 3]) -> HullSize {
    HullSize {
        mins: DVec3::new(mins[0], mins[1], mins[2]),
        maxs: DVec3::new(maxs[0], maxs[1], maxs[2]),
    }
}

/// Hull 0 is the point hull; the rest come from the game's movement code.
static QUAKE_HULLS: [HullSize; 3] = [
    hull([0., 0., 0.], [0., 0., 0.]),
    hull([-16., -16., -24.], [16., 16., 32.]),
    hull([-32., -32., -24.], [32., 32., 64.]),
];

static HALF_LIFE_HULLS: [HullSize; 4] = [
    hull([0., 0., 0.], [0., 0., 0.]),
    hull([-16., -16., -36.], [16., 16., 36.]),
    hull([-32., -32., -32.], [32., 32., 32.]),
    hull([-16., -16., -18.], [16., 16., 18.]),
];

static HEXEN2_HULLS: [HullSize; 4] = [
    hull([0., 0., 0.], [0., 0., 0.]),
    hull([-16., -16., -24.], [16., 16., 32.]),
    hull([-24., -24., -20.], [24., 24., 20.]),
    hull([-16., -16., -16.], [16., 16., 12.]),
];

static QUAKE2_HULLS: [HullSize; 1] = [hull([0., 0., 0.], [0., 0., 0.])];

#[derive(Debug, Clone, Copy)]
pub struct GameDef {
    pub id: GameId,
    pub default_format: BspFormat,
    pub hull_sizes: &'static [HullSize],
    /// RGB lighting in the native lump rather than greyscale + sidecar.
    pub rgb_lighting: bool,
}

impl GameDef {
    pub fn quake() -> Self {
        Self {
            id: GameId::Quake,
            default_format: BspFormat::V29,
            hull_sizes: &QUAKE_HULLS,
            rgb_lighting: false,
        }
    }

    pub fn hexen2() -> Self {
        Self {
            id: GameId::Hexen2,
            default_format: BspFormat::V29,
            hull_sizes: &HEXEN2_HULLS,
            rgb_lighting: false,
        }
    }

    pub fn half_life() -> Self {
        Self {
            id: GameId::HalfLife,
            default_format: BspFormat::GoldSrc30,
            hull_sizes: &HALF_LIFE_HULLS,
            rgb_lighting: true,
        }
    }

    pub fn quake2() -> Self {
        Self {
            id: GameId::Quake2,
            default_format: BspFormat::Quake2,
            hull_sizes: &QUAKE2_HULLS,
            rgb_lighting: true,
        }
    }

    pub fn is_quake2(&self) -> bool {
        self.id == GameId::Quake2
    }

    /// Compiler contents to the on-disk leaf contents value.
    pub fn contents_to_disk(&self, contents: Contents) -> i32 {
        if self.is_quake2() {
            return self.contents_to_q2(contents).bits() as i32;
        }

        let native = match contents {
            Contents::Empty | Contents::Mist | Contents::DetailIllusionary => LeafContents::Empty,
            Contents::Water => LeafContents::Water,
            Contents::Slime => LeafContents::Slime,
            Contents::Lava => LeafContents::Lava,
            Contents::Sky => LeafContents::Sky,
            Contents::Origin => LeafContents::Origin,
            Contents::PlayerClip | Contents::MonsterClip => LeafContents::Clip,
            // Everything solid-like collapses to solid in the Quake family.
            _ => LeafContents::Solid,
        };

        native as i32
    }

    fn contents_to_q2(&self, contents: Contents) -> Q2Contents {
        match contents {
            Contents::Empty => Q2Contents::empty(),
            Contents::Solid | Contents::Sky => Q2Contents::SOLID,
            Contents::DetailSolid => Q2Contents::SOLID | Q2Contents::DETAIL,
            Contents::DetailWall => Q2Contents::SOLID | Q2Contents::DETAIL,
            Contents::Window => Q2Contents::WINDOW | Q2Contents::TRANSLUCENT,
            Contents::DetailIllusionary => Q2Contents::MIST | Q2Contents::DETAIL,
            Contents::Mist => Q2Contents::MIST,
            Contents::Water => Q2Contents::WATER,
            Contents::Slime => Q2Contents::SLIME,
            Contents::Lava => Q2Contents::LAVA,
            Contents::PlayerClip => Q2Contents::PLAYERCLIP,
            Contents::MonsterClip => Q2Contents::MONSTERCLIP,
            Contents::Areaportal => Q2Contents::AREAPORTAL,
            Contents::Origin => Q2Contents::ORIGIN,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quake_clip_is_clip() {
        let game = GameDef::quake();
        assert_eq!(
            game.contents_to_disk(Contents::PlayerClip),
            LeafContents::Clip as i32
        );
    }

    #[test]
    fn q2_detail_keeps_detail_bit() {
        let game = GameDef::quake2();
        let disk = game.contents_to_disk(Contents::DetailSolid) as u32;

        assert_ne!(disk & Q2Contents::DETAIL.bits(), 0);
        assert_ne!(disk & Q2Contents::SOLID.bits(), 0);
    }

    #[test]
    fn hull_counts() {
        assert_eq!(GameDef::quake().hull_sizes.len(), 3);
        assert_eq!(GameDef::half_life().hull_sizes.len(), 4);
        assert_eq!(GameDef::quake2().hull_sizes.len(), 1);
    }
}
