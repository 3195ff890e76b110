use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the Haversine formula, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A point on the globe in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Checks that both components are finite and inside their ranges.
    pub fn check(&self) -> Result<(), String> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err("coordinates must be finite numbers".to_string());
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("latitude {} is outside [-90, 90]", self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(format!("longitude {} is outside [-180, 180]", self.longitude));
        }
        Ok(())
    }
}

/// Great-circle distance between two points, in meters.
pub fn haversine_distance(a: Coordinates, b: Coordinates) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1 for antipodal points.
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_METERS * c
}

/// Outcome of one geofence check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeofenceOutcome {
    /// Whether the point lies inside the fence (inclusive of the boundary).
    pub valid: bool,
    /// Unrounded distance to the center, when the inputs allowed computing it.
    pub distance_meters: Option<f64>,
    /// The radius that was applied.
    pub radius_meters: f64,
    /// Why the check failed, in words a student can act on.
    pub reason: Option<String>,
}

impl GeofenceOutcome {
    fn rejected(radius_meters: f64, reason: String) -> Self {
        Self {
            valid: false,
            distance_meters: None,
            radius_meters,
            reason: Some(reason),
        }
    }

    /// Distance rounded to the nearest meter, for storage and display.
    pub fn rounded_distance(&self) -> Option<i32> {
        self.distance_meters.map(|d| d.round() as i32)
    }
}

/// Checks whether `student` lies within `radius_meters` of `classroom`.
///
/// Never panics: malformed input fails closed with a diagnostic reason.
pub fn validate(student: Coordinates, classroom: Coordinates, radius_meters: f64) -> GeofenceOutcome {
    if let Err(reason) = student.check() {
        return GeofenceOutcome::rejected(radius_meters, format!("Invalid GPS reading: {}", reason));
    }
    if let Err(reason) = classroom.check() {
        tracing::error!("Classroom location is malformed: {}", reason);
        return GeofenceOutcome::rejected(
            radius_meters,
            "Classroom location is not configured correctly".to_string(),
        );
    }
    if !radius_meters.is_finite() || radius_meters < 0.0 {
        tracing::error!("Geofence radius is malformed: {}", radius_meters);
        return GeofenceOutcome::rejected(
            radius_meters,
            "Classroom geofence is not configured correctly".to_string(),
        );
    }

    let distance = haversine_distance(student, classroom);
    let valid = distance <= radius_meters;
    let shown = distance.round();

    let reason = if valid {
        None
    } else {
        Some(format!(
            "You are {}m from the classroom, outside the {}m radius",
            shown, radius_meters
        ))
    };

    GeofenceOutcome {
        valid,
        distance_meters: Some(distance),
        radius_meters,
        reason,
    }
}
