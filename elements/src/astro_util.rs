// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use astro::angle::anglr_sepr;

/// Returns the separation, in radians, between the given celestial coordinates
/// (in radians).
pub fn angular_separation(
    p0_ra: f64,
    p0_dec: f64,
    p1_ra: f64,
    p1_dec: f64,
) -> f64 {
    anglr_sepr(p0_ra, p0_dec, p1_ra, p1_dec)
}

/// Formats right ascension (degrees) as `HH:MM:SS.S` (always 10 characters).
pub fn format_ra_hms(ra: f64) -> String {
    // Work in integer tenths of a second of time so that rounding carries
    // propagate into minutes and hours.
    let tenths_per_day = 24 * 60 * 60 * 10;
    let ra = ra.rem_euclid(360.0);
    let tenths = ((ra / 15.0) * 36000.0).round() as i64 % tenths_per_day;
    let hours = tenths / 36000;
    let minutes = (tenths % 36000) / 600;
    let seconds = (tenths % 600) / 10;
    format!("{:02}:{:02}:{:02}.{}", hours, minutes, seconds, tenths % 10)
}

/// Formats declination (degrees) as `±DD:MM:SS.S` (always 11 characters, with
/// explicit sign).
pub fn format_dec_dms(dec: f64) -> String {
    let sign = if dec < 0.0 { '-' } else { '+' };
    let dec = dec.abs().min(90.0);
    let tenths = (dec * 36000.0).round() as i64;
    let degrees = tenths / 36000;
    let minutes = (tenths % 36000) / 600;
    let seconds = (tenths % 600) / 10;
    format!("{}{:02}:{:02}:{:02}.{}", sign, degrees, minutes, seconds, tenths % 10)
}

// Reference point (RA hours, Dec degrees) near the middle of each
// constellation's area. Serpens is split into Caput and Cauda.
const CONSTELLATION_CENTERS: &[(&str, f64, f64)] = &[
    ("Andromeda", 0.81, 37.4),
    ("Antlia", 10.27, -32.5),
    ("Apus", 16.14, -75.3),
    ("Aquarius", 22.29, -10.8),
    ("Aquila", 19.67, 3.4),
    ("Ara", 17.37, -56.6),
    ("Aries", 2.64, 20.8),
    ("Auriga", 6.07, 42.0),
    ("Boötes", 14.71, 31.2),
    ("Caelum", 4.70, -37.9),
    ("Camelopardalis", 8.86, 69.4),
    ("Cancer", 8.65, 19.8),
    ("Canes Venatici", 13.12, 40.1),
    ("Canis Major", 6.83, -22.1),
    ("Canis Minor", 7.65, 6.4),
    ("Capricornus", 21.05, -18.0),
    ("Carina", 8.70, -63.2),
    ("Cassiopeia", 1.32, 62.2),
    ("Centaurus", 13.07, -47.3),
    ("Cepheus", 22.42, 71.0),
    ("Cetus", 1.67, -7.2),
    ("Chamaeleon", 10.69, -79.2),
    ("Circinus", 14.58, -63.0),
    ("Columba", 5.86, -35.1),
    ("Coma Berenices", 12.79, 23.3),
    ("Corona Australis", 18.65, -41.1),
    ("Corona Borealis", 15.84, 32.6),
    ("Corvus", 12.44, -18.4),
    ("Crater", 11.39, -15.9),
    ("Crux", 12.45, -60.2),
    ("Cygnus", 20.59, 44.5),
    ("Delphinus", 20.69, 11.7),
    ("Dorado", 5.24, -59.4),
    ("Draco", 15.14, 67.0),
    ("Equuleus", 21.19, 7.8),
    ("Eridanus", 3.30, -28.8),
    ("Fornax", 2.80, -31.6),
    ("Gemini", 7.07, 22.6),
    ("Grus", 22.46, -46.4),
    ("Hercules", 17.39, 27.5),
    ("Horologium", 3.28, -53.3),
    ("Hydra", 11.61, -14.5),
    ("Hydrus", 2.34, -69.9),
    ("Indus", 21.97, -59.7),
    ("Lacerta", 22.46, 46.0),
    ("Leo", 10.67, 13.1),
    ("Leo Minor", 10.25, 32.1),
    ("Lepus", 5.57, -19.0),
    ("Libra", 15.20, -15.2),
    ("Lupus", 15.22, -42.7),
    ("Lynx", 7.99, 47.5),
    ("Lyra", 18.85, 36.7),
    ("Mensa", 5.42, -77.5),
    ("Microscopium", 20.96, -36.3),
    ("Monoceros", 7.06, 0.3),
    ("Musca", 12.59, -70.2),
    ("Norma", 15.90, -51.4),
    ("Octans", 23.00, -82.2),
    ("Ophiuchus", 17.39, -7.9),
    ("Orion", 5.58, 5.9),
    ("Pavo", 19.61, -65.8),
    ("Pegasus", 22.70, 19.5),
    ("Perseus", 3.18, 45.0),
    ("Phoenix", 0.93, -48.6),
    ("Pictor", 5.71, -53.5),
    ("Pisces", 0.48, 13.7),
    ("Piscis Austrinus", 22.28, -30.6),
    ("Puppis", 7.25, -31.2),
    ("Pyxis", 8.95, -27.4),
    ("Reticulum", 3.92, -60.0),
    ("Sagitta", 19.65, 18.9),
    ("Sagittarius", 19.10, -28.5),
    ("Scorpius", 16.89, -27.0),
    ("Sculptor", 0.44, -32.1),
    ("Scutum", 18.67, -9.9),
    ("Serpens", 15.74, 10.1),
    ("Serpens", 18.00, -5.0),
    ("Sextans", 10.27, -2.6),
    ("Taurus", 4.70, 14.9),
    ("Telescopium", 19.33, -51.0),
    ("Triangulum", 2.18, 31.5),
    ("Triangulum Australe", 16.08, -65.4),
    ("Tucana", 23.78, -65.8),
    ("Ursa Major", 11.31, 50.7),
    ("Ursa Minor", 15.00, 77.7),
    ("Vela", 9.58, -47.2),
    ("Virgo", 13.41, -4.2),
    ("Volans", 7.80, -69.8),
    ("Vulpecula", 20.23, 24.4),
];

/// Returns the name of the constellation whose reference center is closest
/// to the given position (RA, Dec in degrees).
pub fn constellation_from_equatorial(ra: f64, dec: f64) -> &'static str {
    let ra_rad = ra.rem_euclid(360.0).to_radians();
    let dec_rad = dec.clamp(-90.0, 90.0).to_radians();
    let mut best_name = CONSTELLATION_CENTERS[0].0;
    let mut best_sep = f64::MAX;
    for &(name, center_ra_hours, center_dec) in CONSTELLATION_CENTERS {
        let sep = angular_separation(ra_rad, dec_rad,
                                     (center_ra_hours * 15.0).to_radians(),
                                     center_dec.to_radians());
        if sep < best_sep {
            best_sep = sep;
            best_name = name;
        }
    }
    best_name
}

// mod tests.
