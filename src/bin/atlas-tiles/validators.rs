use atlas_tile_cache::{GeoPoint, UrlFormat, ZoomTier};
use std::time::Duration;

pub fn is_latitude(v: &str) -> Result<f64, String> {
    let val = v.parse::<f64>().map_err(|_| "must be numeric".to_owned())?;

    GeoPoint::new(val, 0_f64)
        .map(|_| val)
        .map_err(|_| "must be > -90° and < 90°".to_owned())
}

pub fn is_longitude(v: &str) -> Result<f64, String> {
    let val = v.parse::<f64>().map_err(|_| "must be numeric".to_owned())?;

    GeoPoint::new(0_f64, val)
        .map(|_| val)
        .map_err(|_| "must be >= -180° and <= 180°".to_owned())
}

pub fn is_zoom_tier(v: &str) -> Result<ZoomTier, String> {
    v.parse::<ZoomTier>().map_err(|_| "must be country, region, or station".to_owned())
}

pub fn is_url_template(v: &str) -> Result<String, String> {
    UrlFormat::parse(v)
        .map(|_| v.to_owned())
        .map_err(|e| e.to_string())
}

pub fn is_seconds(v: &str) -> Result<Duration, String> {
    let val = v.parse::<f64>().map_err(|_| "must be numeric".to_owned())?;

    if !val.is_finite() || val < 0_f64 {
        return Err("must be >= 0".to_owned());
    }

    Ok(Duration::from_secs_f64(val))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates() {
        assert_eq!(is_latitude("-54.1"), Ok(-54.1));
        assert!(is_latitude("90").is_err());
        assert!(is_latitude("north").is_err());
        assert_eq!(is_longitude("180"), Ok(180.0));
        assert!(is_longitude("-180.01").is_err());
    }

    #[test]
    fn tiers_and_durations() {
        assert_eq!(is_zoom_tier("station"), Ok(ZoomTier::Station));
        assert!(is_zoom_tier("planet").is_err());
        assert_eq!(is_seconds("0.5"), Ok(Duration::from_millis(500)));
        assert!(is_seconds("-1").is_err());
    }
}
