//! Per-image camera/lens variables and the cross-image linking model.
//!
//! Every image carries one scalar per [`VarName`]. Variables of the same
//! name may be *linked* across images, forcing them to share one value:
//! writing any member of a link class writes all of them, and the free
//! parameter vector built for optimization contains a single entry per
//! class. Link classes are stored as explicit membership lists keyed by
//! stable `(image, name)` indices, so ownership and serialization stay
//! simple.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::math::Real;

/// Names of the per-image scalar variables, using the panorama-script
/// alphabet for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VarName {
    /// Horizontal rotation about the vertical axis (`y`, degrees).
    Yaw,
    /// Tilt about the image x-axis (`p`, degrees).
    Pitch,
    /// Spin about the viewing direction (`r`, degrees).
    Roll,
    /// Horizontal field of view (`v`, degrees).
    Hfov,
    /// Radial distortion polynomial coefficients (`a`, `b`, `c`).
    RadialA,
    RadialB,
    RadialC,
    /// Distortion center shift (`d`, `e`, pixels).
    ShiftD,
    ShiftE,
    /// Shear (`g`, `t`).
    ShearG,
    ShearT,
    /// Camera translation (`TrX`, `TrY`, `TrZ`).
    TrX,
    TrY,
    TrZ,
    /// Exposure value (`Eev`).
    Eev,
    /// White balance multipliers (`Er`, `Eb`).
    Er,
    Eb,
    /// Vignetting polynomial (`Vb`, `Vc`, `Vd`) and its center (`Vx`, `Vy`).
    VigB,
    VigC,
    VigD,
    VigX,
    VigY,
    /// Camera response curve coefficients (`Ra` .. `Re`).
    RespA,
    RespB,
    RespC,
    RespD,
    RespE,
}

impl VarName {
    /// All variable names in storage order.
    pub const ALL: [VarName; 26] = [
        VarName::Yaw,
        VarName::Pitch,
        VarName::Roll,
        VarName::Hfov,
        VarName::RadialA,
        VarName::RadialB,
        VarName::RadialC,
        VarName::ShiftD,
        VarName::ShiftE,
        VarName::ShearG,
        VarName::ShearT,
        VarName::TrX,
        VarName::TrY,
        VarName::TrZ,
        VarName::Eev,
        VarName::Er,
        VarName::Eb,
        VarName::VigB,
        VarName::VigC,
        VarName::VigD,
        VarName::VigX,
        VarName::VigY,
        VarName::RespA,
        VarName::RespB,
        VarName::RespC,
        VarName::RespD,
        VarName::RespE,
    ];

    /// Number of variables per image.
    pub const COUNT: usize = Self::ALL.len();

    /// Storage index of this variable.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Panorama-script name.
    pub fn as_str(self) -> &'static str {
        match self {
            VarName::Yaw => "y",
            VarName::Pitch => "p",
            VarName::Roll => "r",
            VarName::Hfov => "v",
            VarName::RadialA => "a",
            VarName::RadialB => "b",
            VarName::RadialC => "c",
            VarName::ShiftD => "d",
            VarName::ShiftE => "e",
            VarName::ShearG => "g",
            VarName::ShearT => "t",
            VarName::TrX => "TrX",
            VarName::TrY => "TrY",
            VarName::TrZ => "TrZ",
            VarName::Eev => "Eev",
            VarName::Er => "Er",
            VarName::Eb => "Eb",
            VarName::VigB => "Vb",
            VarName::VigC => "Vc",
            VarName::VigD => "Vd",
            VarName::VigX => "Vx",
            VarName::VigY => "Vy",
            VarName::RespA => "Ra",
            VarName::RespB => "Rb",
            VarName::RespC => "Rc",
            VarName::RespD => "Rd",
            VarName::RespE => "Re",
        }
    }

    /// Pose variables (yaw, pitch, roll).
    pub fn is_pose(self) -> bool {
        matches!(self, VarName::Yaw | VarName::Pitch | VarName::Roll)
    }

    /// Translation components.
    pub fn is_translation(self) -> bool {
        matches!(self, VarName::TrX | VarName::TrY | VarName::TrZ)
    }
}

impl fmt::Display for VarName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ordered collection of variable values for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSet {
    values: Vec<Real>,
}

impl Default for VariableSet {
    fn default() -> Self {
        let mut values = vec![0.0; VarName::COUNT];
        values[VarName::Hfov.index()] = 50.0;
        values[VarName::Er.index()] = 1.0;
        values[VarName::Eb.index()] = 1.0;
        Self { values }
    }
}

impl VariableSet {
    /// Raw read of one variable, ignoring links.
    pub fn get(&self, name: VarName) -> Real {
        self.values[name.index()]
    }

    /// Raw write of one variable, ignoring links.
    pub fn set(&mut self, name: VarName, value: Real) {
        self.values[name.index()] = value;
    }

    /// Iterate `(name, value)` pairs in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (VarName, Real)> + '_ {
        VarName::ALL.iter().map(move |&n| (n, self.get(n)))
    }
}

/// The per-run selection of free variables: one set of names per image.
pub type OptimizeVector = Vec<BTreeSet<VarName>>;

/// Equivalence classes of linked variables.
///
/// Keys are `image * VarName::COUNT + name.index()`. Each key belongs to
/// exactly one class; unlinked variables form singleton classes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkModel {
    class_of: Vec<usize>,
    members: Vec<Vec<usize>>,
}

impl LinkModel {
    pub fn new(num_images: usize) -> Self {
        let n = num_images * VarName::COUNT;
        Self {
            class_of: (0..n).collect(),
            members: (0..n).map(|k| vec![k]).collect(),
        }
    }

    fn key(image: usize, name: VarName) -> usize {
        image * VarName::COUNT + name.index()
    }

    fn unkey(key: usize) -> (usize, VarName) {
        (key / VarName::COUNT, VarName::ALL[key % VarName::COUNT])
    }

    pub fn num_images(&self) -> usize {
        self.class_of.len() / VarName::COUNT
    }

    /// Extend the model with the singleton classes of one more image.
    pub fn push_image(&mut self) {
        let start = self.class_of.len();
        for k in start..start + VarName::COUNT {
            self.class_of.push(self.members.len());
            self.members.push(vec![k]);
        }
    }

    /// Drop an image, clearing links to it and renumbering later images.
    pub fn remove_image(&mut self, image: usize) {
        let old = std::mem::take(self);
        let n = old.num_images();
        assert!(image < n, "remove_image: index {} out of range", image);
        *self = LinkModel::new(n - 1);
        let map = |img: usize| if img > image { img - 1 } else { img };
        for class in &old.members {
            let survivors: Vec<(usize, VarName)> = class
                .iter()
                .map(|&k| Self::unkey(k))
                .filter(|&(img, _)| img != image)
                .map(|(img, name)| (map(img), name))
                .collect();
            for pair in survivors.windows(2) {
                self.link(pair[1].0, pair[0].0, pair[0].1);
            }
        }
    }

    /// Merge the classes of `(image, name)` and `(target, name)`.
    ///
    /// The caller is responsible for propagating the target's value to
    /// the merged class afterwards.
    pub fn link(&mut self, image: usize, target: usize, name: VarName) {
        let ka = Self::key(image, name);
        let kb = Self::key(target, name);
        let (ca, cb) = (self.class_of[ka], self.class_of[kb]);
        if ca == cb {
            return;
        }
        let moved = std::mem::take(&mut self.members[ca]);
        for &k in &moved {
            self.class_of[k] = cb;
        }
        self.members[cb].extend(moved);
        self.members[cb].sort_unstable();
    }

    /// Remove `(image, name)` from its class, making it independent again.
    pub fn unlink(&mut self, image: usize, name: VarName) {
        let k = Self::key(image, name);
        let c = self.class_of[k];
        if self.members[c].len() < 2 {
            return;
        }
        self.members[c].retain(|&m| m != k);
        self.class_of[k] = self.members.len();
        self.members.push(vec![k]);
    }

    /// Whether the variable shares its class with any other variable.
    pub fn is_linked(&self, image: usize, name: VarName) -> bool {
        self.members[self.class_of[Self::key(image, name)]].len() > 1
    }

    /// Whether the same-named variables of two images share a class.
    pub fn linked_with(&self, a: usize, b: usize, name: VarName) -> bool {
        self.class_of[Self::key(a, name)] == self.class_of[Self::key(b, name)]
    }

    /// Members of the class containing `(image, name)`, as `(image, name)`
    /// pairs in ascending key order.
    pub fn class_members(&self, image: usize, name: VarName) -> Vec<(usize, VarName)> {
        self.members[self.class_of[Self::key(image, name)]]
            .iter()
            .map(|&k| Self::unkey(k))
            .collect()
    }

    /// Canonical `(image, name)` for the class containing `(image, name)`:
    /// the member with the lowest key.
    pub fn representative(&self, image: usize, name: VarName) -> (usize, VarName) {
        Self::unkey(self.members[self.class_of[Self::key(image, name)]][0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_classes_by_default() {
        let m = LinkModel::new(3);
        assert!(!m.is_linked(0, VarName::Yaw));
        assert!(!m.linked_with(0, 1, VarName::Yaw));
        assert_eq!(m.representative(2, VarName::Hfov), (2, VarName::Hfov));
    }

    #[test]
    fn link_and_unlink_round_trip() {
        let mut m = LinkModel::new(3);
        m.link(1, 0, VarName::Hfov);
        m.link(2, 0, VarName::Hfov);
        assert!(m.linked_with(1, 2, VarName::Hfov));
        assert_eq!(m.class_members(2, VarName::Hfov).len(), 3);
        assert_eq!(m.representative(2, VarName::Hfov), (0, VarName::Hfov));

        m.unlink(1, VarName::Hfov);
        assert!(!m.is_linked(1, VarName::Hfov));
        assert!(m.linked_with(0, 2, VarName::Hfov));
    }

    #[test]
    fn remove_image_renumbers_links() {
        let mut m = LinkModel::new(4);
        m.link(1, 0, VarName::Hfov);
        m.link(3, 2, VarName::RadialB);
        m.remove_image(1);
        assert_eq!(m.num_images(), 3);
        assert!(!m.is_linked(0, VarName::Hfov));
        // Former images 2 and 3 are now 1 and 2.
        assert!(m.linked_with(1, 2, VarName::RadialB));
    }

    #[test]
    fn different_names_never_share_a_class() {
        let mut m = LinkModel::new(2);
        m.link(1, 0, VarName::Yaw);
        assert!(!m.linked_with(0, 1, VarName::Pitch));
    }
}
