use geobuf_flat::{WireScalar, WireStruct};
use static_assertions::const_assert_eq;

/// A 3D coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vector {
    /// Easting, or longitude.
    pub x: f64,
    /// Northing, or latitude.
    pub y: f64,
    /// Elevation.
    pub z: f64,
}

impl Vector {
    /// A coordinate from its components.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl WireStruct for Vector {
    const SIZE: usize = 24;
    const ALIGN: usize = 8;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.x.to_le_bytes());
        out.extend_from_slice(&self.y.to_le_bytes());
        out.extend_from_slice(&self.z.to_le_bytes());
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            x: f64::read_le(bytes),
            y: f64::read_le(&bytes[8..]),
            z: f64::read_le(&bytes[16..]),
        }
    }
}

const_assert_eq!(Vector::SIZE, 24);

/// The affine mapping from stored integer coordinates to world coordinates:
/// `world = stored * scale + translate`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transform {
    /// Per-axis multiplier.
    pub scale: Vector,
    /// Per-axis offset.
    pub translate: Vector,
}

impl Transform {
    /// A transform from its parts.
    pub fn new(scale: Vector, translate: Vector) -> Self {
        Self { scale, translate }
    }
}

impl WireStruct for Transform {
    const SIZE: usize = 48;
    const ALIGN: usize = 8;

    fn write(&self, out: &mut Vec<u8>) {
        self.scale.write(out);
        self.translate.write(out);
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            scale: Vector::read(bytes),
            translate: Vector::read(&bytes[24..]),
        }
    }
}

const_assert_eq!(Transform::SIZE, 2 * Vector::SIZE);

/// An axis-aligned bounding box in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeographicalExtent {
    /// Minimum corner.
    pub min: Vector,
    /// Maximum corner.
    pub max: Vector,
}

impl GeographicalExtent {
    /// An extent from its corners.
    pub fn new(min: Vector, max: Vector) -> Self {
        Self { min, max }
    }
}

impl WireStruct for GeographicalExtent {
    const SIZE: usize = 48;
    const ALIGN: usize = 8;

    fn write(&self, out: &mut Vec<u8>) {
        self.min.write(out);
        self.max.write(out);
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            min: Vector::read(bytes),
            max: Vector::read(&bytes[24..]),
        }
    }
}

const_assert_eq!(GeographicalExtent::SIZE, 2 * Vector::SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structs_round_trip_their_frozen_layout() {
        let transform = Transform::new(
            Vector::new(0.001, 0.001, 0.01),
            Vector::new(85000.0, 446000.0, 0.0),
        );
        let mut raw = Vec::new();
        transform.write(&mut raw);
        assert_eq!(raw.len(), Transform::SIZE);
        // scale.x occupies the first eight bytes, per the frozen member
        // order.
        assert_eq!(f64::from_le_bytes(raw[..8].try_into().unwrap()), 0.001);
        assert_eq!(Transform::read(&raw), transform);

        let extent = GeographicalExtent::new(
            Vector::new(84000.0, 445000.0, -10.0),
            Vector::new(86000.0, 447000.0, 120.0),
        );
        let mut raw = Vec::new();
        extent.write(&mut raw);
        assert_eq!(GeographicalExtent::read(&raw), extent);
    }
}
