use glam::{DMat4, DVec3, DVec4};

/// WGS84 semi-major axis in metres.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS84 first eccentricity squared: e² = 2f - f²
const WGS84_E2: f64 = 2.0 * WGS84_F - WGS84_F * WGS84_F;
/// WGS84 semi-minor axis in metres.
const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);

/// Convert geodetic (longitude, latitude, altitude) to ECEF XYZ.
///
/// Inputs are in **degrees** and metres.  Returns `[X, Y, Z]` in metres.
pub fn geodetic_to_ecef(lon_deg: f64, lat_deg: f64, alt_m: f64) -> [f64; 3] {
    let lon = lon_deg.to_radians();
    let lat = lat_deg.to_radians();

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let sin_lon = lon.sin();
    let cos_lon = lon.cos();

    // Radius of curvature in the prime vertical
    let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();

    let x = (n + alt_m) * cos_lat * cos_lon;
    let y = (n + alt_m) * cos_lat * sin_lon;
    let z = (n * (1.0 - WGS84_E2) + alt_m) * sin_lat;

    [x, y, z]
}

/// Convert ECEF XYZ back to geodetic `[lon_deg, lat_deg, alt_m]`.
///
/// Bowring's method with a few fixed-point refinements; sub-millimetre
/// for points near the surface.
pub fn ecef_to_geodetic(ecef: [f64; 3]) -> [f64; 3] {
    let [x, y, z] = ecef;
    let p = (x * x + y * y).sqrt();
    let lon = y.atan2(x);

    if p < 1e-9 {
        // On the polar axis
        let lat = if z >= 0.0 { 90.0 } else { -90.0 };
        return [lon.to_degrees(), lat, z.abs() - WGS84_B];
    }

    let ep2 = (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);
    let theta = (z * WGS84_A).atan2(p * WGS84_B);
    let mut lat = (z + ep2 * WGS84_B * theta.sin().powi(3))
        .atan2(p - WGS84_E2 * WGS84_A * theta.cos().powi(3));

    let prime_vertical = |lat: f64| WGS84_A / (1.0 - WGS84_E2 * lat.sin() * lat.sin()).sqrt();
    for _ in 0..3 {
        let n = prime_vertical(lat);
        let alt = p / lat.cos() - n;
        lat = z.atan2(p * (1.0 - WGS84_E2 * n / (n + alt)));
    }
    let alt = p / lat.cos() - prime_vertical(lat);

    [lon.to_degrees(), lat.to_degrees(), alt]
}

/// Local East-North-Up frame at a geodetic point, as a local-to-ECEF matrix.
pub fn enu_frame(lon_deg: f64, lat_deg: f64, alt_m: f64) -> DMat4 {
    let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();
    let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();

    let east = DVec3::new(-sin_lon, cos_lon, 0.0);
    let north = DVec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
    let up = DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);
    let origin = DVec3::from_array(geodetic_to_ecef(lon_deg, lat_deg, alt_m));

    DMat4::from_cols(east.extend(0.0), north.extend(0.0), up.extend(0.0), origin.extend(1.0))
}

/// glTF content is Y-up; tiles are Z-up. Rotates +90° about X.
pub fn y_up_to_z_up() -> DMat4 {
    DMat4::from_cols(
        DVec4::new(1.0, 0.0, 0.0, 0.0),
        DVec4::new(0.0, 0.0, 1.0, 0.0),
        DVec4::new(0.0, -1.0, 0.0, 0.0),
        DVec4::new(0.0, 0.0, 0.0, 1.0),
    )
}

/// Height of `ecef` above the WGS84 ellipsoid in metres.
pub fn height_above_ellipsoid(ecef: DVec3) -> f64 {
    ecef_to_geodetic(ecef.to_array())[2]
}
