//! Exposure metadata
//!
//! Maps the EXIF exposure triple (aperture, shutter, ISO) to an EV
//! number, and from there to the incident illuminance (in lux) that
//! would saturate a photosite. That illuminance is the only value used
//! downstream: it is what lets pixels from differently-exposed frames
//! be rescaled into a common radiometric space.

use std::fmt;

/// A ratio of two integers, as found in EXIF rational fields.
/// Shutter speeds are stored as e.g. (1, 2000).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational(pub i64, pub i64);

/// How a photograph was exposed, plus the derived EV and saturation
/// illuminance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureValue {
    /// 100, 800, etc.
    pub iso: i64,

    /// f/5.6 is the integer 56
    pub aperture_x10: i64,

    /// 1/500, 1/1000, etc.
    pub shutter: Rational,

    /// The final EV value - https://en.wikipedia.org/wiki/Exposure_value
    pub ev: i64,

    /// How many lux generate a channel exposure of 0xFFFF. This is the
    /// only value used downstream; it scales pixels during fusion.
    pub illum_at_max: f64,
}

/// The sequence of "whole" f-stops from f/1.0 to f/32, as x10 values
const APERTURE_X10_FSTOPS: [i64; 11] = [10, 14, 20, 28, 40, 56, 80, 110, 160, 220, 320];

/// Standard shutter speeds; the sequence isn't quite mathematical
const SHUTTER_SPEEDS: [Rational; 19] = [
    Rational(1, 4000),
    Rational(1, 2000),
    Rational(1, 1000),
    Rational(1, 500),
    Rational(1, 250),
    Rational(1, 125),
    Rational(1, 60),
    Rational(1, 30),
    Rational(1, 15),
    Rational(1, 8),
    Rational(1, 4),
    Rational(1, 2),
    Rational(1, 1),
    Rational(2, 1),
    Rational(4, 1),
    Rational(8, 1),
    Rational(16, 1),
    Rational(32, 1),
    Rational(64, 1),
];

/// EV -> max incident illuminance at the sensor, in lux.
/// https://en.wikipedia.org/wiki/Exposure_value#EV_as_a_measure_of_luminance_and_illuminance
const ILLUMINANCE_BY_EV: [(i64, f64); 13] = [
    (6, 160.0),
    (7, 320.0),
    (8, 640.0),
    (9, 1280.0),
    (10, 2560.0),
    (11, 5120.0),
    (12, 10240.0),
    (13, 20480.0),
    (14, 40960.0),
    (15, 81920.0),
    (16, 163840.0),
    (17, 327680.0),
    (18, 655360.0),
];

/// An aperture index has no meaning on its own, but the distance between
/// two of them counts whole stops.
fn closest_aperture_index(aperture_x10: i64) -> usize {
    let mut ret = 0;
    for (i, &fstop) in APERTURE_X10_FSTOPS.iter().enumerate() {
        if fstop <= aperture_x10 {
            ret = i;
        }
    }
    ret
}

fn closest_shutter_index(shutter: Rational) -> usize {
    let mut ret = 0;
    for (i, &ss) in SHUTTER_SPEEDS.iter().enumerate() {
        if shutter.0 >= ss.0 && ss.1 >= shutter.1 {
            ret = i;
        }
    }
    ret
}

fn illuminance_for_ev(ev: i64) -> Option<f64> {
    ILLUMINANCE_BY_EV
        .iter()
        .find(|(e, _)| *e == ev)
        .map(|(_, lux)| *lux)
}

impl ExposureValue {
    pub fn new(iso: i64, aperture_x10: i64, shutter: Rational) -> Self {
        Self {
            iso,
            aperture_x10,
            shutter,
            ev: 0,
            illum_at_max: 0.0,
        }
    }

    /// Compute the EV and saturation illuminance from the exposure
    /// triple. Fails when the triple falls outside the tables, which in
    /// practice means the EXIF data is wrong or the shot was nothing
    /// like an eclipse exposure.
    pub fn validate(&mut self) -> Result<(), String> {
        // f/5.6 at 1/4000 is EV 17; count how we differ from that in
        // stops. Each step toward a smaller aperture raises the EV, each
        // step toward a slower shutter lowers it.
        let ap_steps = closest_aperture_index(self.aperture_x10) as i64
            - closest_aperture_index(56) as i64;
        let ss_steps = closest_shutter_index(self.shutter) as i64
            - closest_shutter_index(Rational(1, 4000)) as i64;

        let mut base = 17 + ap_steps - ss_steps;
        if !(6..=18).contains(&base) {
            return Err(format!(
                "exposure info looks suspicious, base EV={}: {}",
                base, self
            ));
        }

        // Adjust for ISO; the higher the ISO, the less physical light
        // needed to fully expose.
        match self.iso {
            100 => {}
            200 => base -= 1,
            400 => base -= 2,
            800 => base -= 3,
            1600 => base -= 4,
            3200 => base -= 5,
            6400 => base -= 6,
            12800 => base -= 7,
            _ => return Err(format!("({}) had unhandled ISO", self)),
        }

        self.ev = base;
        self.illum_at_max = illuminance_for_ev(base)
            .ok_or_else(|| format!("({}) EV {} outside illuminance table", self, base))?;

        Ok(())
    }
}

impl fmt::Display for ExposureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f/{:.1}", self.aperture_x10 as f64 / 10.0)?;
        if self.shutter.1 != 1 {
            write!(f, ", {}/{}", self.shutter.0, self.shutter.1)?;
        } else {
            write!(f, ", {}", self.shutter.0)?;
        }
        write!(f, ", ISO{}", self.iso)?;
        write!(f, ", EV {} ({:.0} lux)", self.ev, self.illum_at_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_point() {
        // The anchor: f/5.6, 1/4000s, ISO 100 is EV 17
        let mut ev = ExposureValue::new(100, 56, Rational(1, 4000));
        ev.validate().unwrap();
        assert_eq!(ev.ev, 17);
        assert!((ev.illum_at_max - 327680.0).abs() < 1e-9);
    }

    #[test]
    fn test_iso_shift() {
        // Same aperture/shutter at ISO 800 is three stops down
        let mut ev = ExposureValue::new(800, 56, Rational(1, 4000));
        ev.validate().unwrap();
        assert_eq!(ev.ev, 14);
        assert!((ev.illum_at_max - 40960.0).abs() < 1e-9);
    }

    #[test]
    fn test_iso_doubling_monotonic() {
        // Each ISO doubling drops EV by exactly 1 and halves illuminance
        let mut prev: Option<ExposureValue> = None;
        for iso in [100, 200, 400, 800, 1600] {
            let mut ev = ExposureValue::new(iso, 56, Rational(1, 500));
            ev.validate().unwrap();
            if let Some(p) = prev {
                assert_eq!(ev.ev, p.ev - 1, "ISO {}", iso);
                assert!(
                    (ev.illum_at_max - p.illum_at_max / 2.0).abs() < 1e-9,
                    "ISO {}: {} vs {}",
                    iso,
                    ev.illum_at_max,
                    p.illum_at_max
                );
            }
            prev = Some(ev);
        }
    }

    #[test]
    fn test_shutter_stops() {
        // 1/2000 is one stop more light than 1/4000
        let mut ev = ExposureValue::new(100, 56, Rational(1, 2000));
        ev.validate().unwrap();
        assert_eq!(ev.ev, 16);

        // f/11 is two aperture steps up from f/5.6: net EV 18
        let mut ev = ExposureValue::new(100, 110, Rational(1, 2000));
        ev.validate().unwrap();
        assert_eq!(ev.ev, 18);

        // A couple of points from the classic ISO-100 exposure table
        let mut ev = ExposureValue::new(100, 56, Rational(1, 500));
        ev.validate().unwrap();
        assert_eq!(ev.ev, 14);
        let mut ev = ExposureValue::new(100, 110, Rational(1, 8));
        ev.validate().unwrap();
        assert_eq!(ev.ev, 10);
    }

    #[test]
    fn test_out_of_range_rejected() {
        // A multi-second exposure at a tiny aperture lands far below EV 6
        let mut ev = ExposureValue::new(100, 10, Rational(64, 1));
        assert!(ev.validate().is_err());

        let mut ev = ExposureValue::new(250, 56, Rational(1, 500));
        assert!(ev.validate().is_err(), "non-standard ISO must fail");
    }

    #[test]
    fn test_display_format() {
        let mut ev = ExposureValue::new(800, 56, Rational(1, 2000));
        ev.validate().unwrap();
        let s = format!("{}", ev);
        assert!(s.contains("f/5.6"), "{}", s);
        assert!(s.contains("1/2000"), "{}", s);
        assert!(s.contains("ISO800"), "{}", s);
        assert!(s.contains("EV 14"), "{}", s);
    }
}
