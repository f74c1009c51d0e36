//! Hand landmark data model.
//!
//! Coordinates are normalized to the input frame: `x` grows to the right and `y` grows *down*,
//! both in `[0, 1]`. `z` is depth relative to the wrist, in roughly the same scale as `x`.

use std::{ops::Index, sync::Arc};

use anyhow::bail;
use serde::{ser::SerializeSeq, Serialize, Serializer};

/// Number of landmarks the hand landmark network estimates for each hand.
pub const NUM_LANDMARKS: usize = 21;

/// A single normalized keypoint on a tracked hand.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    #[inline]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f32; 3]> for Landmark {
    #[inline]
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Handedness {
    Left,
    Right,
}

/// The 21 landmarks of one detected hand, in the network's joint order.
///
/// Index with a [`LandmarkIdx`] to get a named joint.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    landmarks: Box<[Landmark]>,
    handedness: Handedness,
    presence: f32,
}

impl LandmarkSet {
    /// Creates a landmark set from exactly [`NUM_LANDMARKS`] landmarks.
    pub fn new<I>(landmarks: I, handedness: Handedness, presence: f32) -> anyhow::Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Landmark>,
    {
        let landmarks = landmarks
            .into_iter()
            .map(Into::into)
            .collect::<Box<[Landmark]>>();
        if landmarks.len() != NUM_LANDMARKS {
            bail!(
                "hand landmark set must have {} entries, got {}",
                NUM_LANDMARKS,
                landmarks.len()
            );
        }
        Ok(Self {
            landmarks,
            handedness,
            presence,
        })
    }

    #[inline]
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Landmark> + '_ {
        self.landmarks.iter()
    }

    /// Returns the estimated handedness.
    ///
    /// This assumes an unmirrored camera image.
    #[inline]
    pub fn handedness(&self) -> Handedness {
        self.handedness
    }

    /// Returns the network's confidence that a hand is present, in `[0, 1]`.
    #[inline]
    pub fn presence(&self) -> f32 {
        self.presence
    }
}

impl Index<LandmarkIdx> for LandmarkSet {
    type Output = Landmark;

    #[inline]
    fn index(&self, index: LandmarkIdx) -> &Landmark {
        &self.landmarks[index as usize]
    }
}

/// Serializes as a plain list of `{x, y, z}` objects.
impl Serialize for LandmarkSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.landmarks.len()))?;
        for lm in self.landmarks.iter() {
            seq.serialize_element(lm)?;
        }
        seq.end()
    }
}

/// Names for the hand landmarks, in network output order.
///
/// - **CMC**: Carpometacarpal joint, the lowest joint of the thumb, near the wrist.
/// - **MCP**: Metacarpophalangeal joint, the knuckles.
/// - **IP**/**PIP**/**DIP**: the (proximal/distal) interphalangeal joints.
/// - **Tip**: the tip of the finger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// All hands found in one frame.
///
/// Cloning is cheap; the landmark sets are shared and never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    hands: Arc<[LandmarkSet]>,
}

impl DetectionResult {
    /// A result with no hands in it.
    pub fn empty() -> Self {
        Self {
            hands: Arc::from(Vec::new()),
        }
    }

    #[inline]
    pub fn hands(&self) -> &[LandmarkSet] {
        &self.hands
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.hands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LandmarkSet> {
        self.hands.iter()
    }
}

impl Default for DetectionResult {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<LandmarkSet>> for DetectionResult {
    fn from(hands: Vec<LandmarkSet>) -> Self {
        Self {
            hands: hands.into(),
        }
    }
}

impl FromIterator<LandmarkSet> for DetectionResult {
    fn from_iter<T: IntoIterator<Item = LandmarkSet>>(iter: T) -> Self {
        Self {
            hands: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a DetectionResult {
    type Item = &'a LandmarkSet;
    type IntoIter = std::slice::Iter<'a, LandmarkSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Serialize for DetectionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.hands[..].serialize(serializer)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// An upright right hand with the wrist at the bottom center of the frame.
    pub(crate) fn upright_hand() -> LandmarkSet {
        let mut positions = vec![[0.5, 0.9, 0.0]; NUM_LANDMARKS];
        positions[LandmarkIdx::ThumbCmc as usize] = [0.45, 0.85, 0.0];
        positions[LandmarkIdx::ThumbMcp as usize] = [0.4, 0.8, 0.0];
        positions[LandmarkIdx::ThumbIp as usize] = [0.37, 0.76, 0.0];
        positions[LandmarkIdx::ThumbTip as usize] = [0.34, 0.72, 0.0];
        positions[LandmarkIdx::IndexFingerMcp as usize] = [0.45, 0.7, 0.0];
        positions[LandmarkIdx::IndexFingerTip as usize] = [0.45, 0.5, 0.0];
        positions[LandmarkIdx::MiddleFingerMcp as usize] = [0.5, 0.7, 0.0];
        positions[LandmarkIdx::MiddleFingerTip as usize] = [0.5, 0.45, 0.0];
        positions[LandmarkIdx::RingFingerMcp as usize] = [0.55, 0.7, 0.0];
        positions[LandmarkIdx::RingFingerPip as usize] = [0.55, 0.62, 0.0];
        positions[LandmarkIdx::PinkyMcp as usize] = [0.6, 0.72, 0.0];
        LandmarkSet::new(positions, Handedness::Right, 0.9).unwrap()
    }

    #[test]
    fn rejects_wrong_length() {
        LandmarkSet::new(vec![[0.0; 3]; 20], Handedness::Left, 1.0).unwrap_err();
        LandmarkSet::new(vec![[0.0; 3]; 22], Handedness::Left, 1.0).unwrap_err();
    }

    #[test]
    fn named_indexing() {
        let hand = upright_hand();
        assert_eq!(hand[LandmarkIdx::Wrist], Landmark::new(0.5, 0.9, 0.0));
        assert_eq!(hand[LandmarkIdx::ThumbTip].x, 0.34);
        assert_eq!(hand.landmarks().len(), NUM_LANDMARKS);
    }

    #[test]
    fn serializes_as_point_lists() {
        let result = DetectionResult::from(vec![upright_hand()]);
        let json = serde_json::to_value(&result).unwrap();
        let hands = json.as_array().unwrap();
        assert_eq!(hands.len(), 1);
        let points = hands[0].as_array().unwrap();
        assert_eq!(points.len(), NUM_LANDMARKS);
        assert_eq!(points[0]["x"], 0.5);
        assert!(points[0].get("z").is_some());

        assert_eq!(serde_json::to_string(&DetectionResult::empty()).unwrap(), "[]");
    }
}
