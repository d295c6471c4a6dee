//! Fixed colour maps shared by every figure

use plotters::style::RGBColor;

/// Breakpoints of the shared diverging palette; row-scaled values are
/// clamped into this interval before colouring.
pub const DIVERGING_MIN: f64 = -3.0;
pub const DIVERGING_MAX: f64 = 3.0;

const LOW: RGBColor = RGBColor(33, 102, 172);
const MID: RGBColor = RGBColor(247, 247, 247);
const HIGH: RGBColor = RGBColor(178, 24, 43);

/// Three-colour diverging palette (blue - white - red) over the fixed
/// breakpoints, shared across every heatmap.
pub fn diverging_color(z: f64) -> RGBColor {
    let z = z.clamp(DIVERGING_MIN, DIVERGING_MAX);
    if z < 0.0 {
        let t = (z - DIVERGING_MIN) / -DIVERGING_MIN;
        lerp(LOW, MID, t)
    } else {
        let t = z / DIVERGING_MAX;
        lerp(MID, HIGH, t)
    }
}

fn lerp(a: RGBColor, b: RGBColor, t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let channel = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * t).round() as u8;
    RGBColor(channel(a.0, b.0), channel(a.1, b.1), channel(a.2, b.2))
}

/// Categorical colours for annotation strips and GO-term modules,
/// cycled by first appearance.
pub fn annotation_color(index: usize) -> RGBColor {
    const STRIP: [RGBColor; 8] = [
        RGBColor(27, 158, 119),
        RGBColor(217, 95, 2),
        RGBColor(117, 112, 179),
        RGBColor(231, 41, 138),
        RGBColor(102, 166, 30),
        RGBColor(230, 171, 2),
        RGBColor(166, 118, 29),
        RGBColor(102, 102, 102),
    ];
    STRIP[index % STRIP.len()]
}

/// Sample-group colours for the PCA projection.
pub fn group_color(is_control: bool) -> RGBColor {
    if is_control {
        RGBColor(70, 70, 70)
    } else {
        RGBColor(214, 96, 30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_and_midpoint() {
        assert_eq!(diverging_color(-3.0), LOW);
        assert_eq!(diverging_color(0.0), MID);
        assert_eq!(diverging_color(3.0), HIGH);
    }

    #[test]
    fn out_of_range_values_clamp_to_endpoints() {
        assert_eq!(diverging_color(-17.0), diverging_color(-3.0));
        assert_eq!(diverging_color(9.0), diverging_color(3.0));
    }

    #[test]
    fn negative_side_stays_blue_tinted() {
        let c = diverging_color(-1.5);
        assert!(c.2 > c.0, "expected blue dominance, got {c:?}");
    }
}
