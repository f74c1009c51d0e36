//! Anchor generation for Single Shot MultiBox Detectors (SSDs).
//!
//! Only the fixed-size, centered anchors used by the palm detection network are supported.

use std::ops::Index;

/// An anchor of an SSD network, in normalized `[0, 1]` input coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    x_center: f32,
    y_center: f32,
}

impl Anchor {
    #[inline]
    pub fn x_center(&self) -> f32 {
        self.x_center
    }

    #[inline]
    pub fn y_center(&self) -> f32 {
        self.y_center
    }
}

/// Describes an output layer of an SSD network.
#[derive(Debug, Clone, Copy)]
pub struct LayerInfo {
    boxes_per_cell: u32,
    width: u32,
    height: u32,
}

impl LayerInfo {
    /// Describes a `width x height` feature map with `boxes_per_cell` anchors per cell.
    ///
    /// # Panics
    ///
    /// Panics if `boxes_per_cell` is 0.
    pub const fn new(boxes_per_cell: u32, width: u32, height: u32) -> Self {
        assert!(boxes_per_cell != 0);
        Self {
            boxes_per_cell,
            width,
            height,
        }
    }
}

/// The anchors of all output layers, in network output order.
pub struct Anchors {
    anchors: Vec<Anchor>,
}

impl Anchors {
    pub fn calculate(layers: &[LayerInfo]) -> Self {
        let mut anchors = Vec::new();
        for layer in layers {
            for y in 0..layer.height {
                for x in 0..layer.width {
                    let anchor = Anchor {
                        x_center: (x as f32 + 0.5) / layer.width as f32,
                        y_center: (y as f32 + 0.5) / layer.height as f32,
                    };
                    anchors.extend((0..layer.boxes_per_cell).map(|_| anchor));
                }
            }
        }
        Self { anchors }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

impl Index<usize> for Anchors {
    type Output = Anchor;

    fn index(&self, index: usize) -> &Anchor {
        &self.anchors[index]
    }
}
