/// Canonical field names. Sinks use these as column names / JSON keys.
pub mod field {
    pub const TITLE: &str = "Title";
    pub const BRAND: &str = "Brand";
    pub const MODEL: &str = "Model";
    pub const LISTING_DATE: &str = "ListingDate";
    pub const PRICE: &str = "Price";
    pub const LOCATION: &str = "Location";
    pub const LINK: &str = "Link";
    pub const YEAR: &str = "Year";
    pub const GENERATION: &str = "Generation";
    pub const CONDITION: &str = "Condition";
    pub const TRIM: &str = "Trim";
    pub const ENGINE_VOLUME: &str = "EngineVolume";
    pub const ENGINE_TYPE: &str = "EngineType";
    pub const TRANSMISSION: &str = "Transmission";
    pub const DRIVE_TYPE: &str = "DriveType";
    pub const BODY_TYPE: &str = "BodyType";
    pub const COLOR: &str = "Color";
    pub const STEERING_SIDE: &str = "SteeringSide";
    pub const FUEL_TANK_CAPACITY: &str = "FuelTankCapacity";
    pub const FUEL_CONSUMPTION: &str = "FuelConsumption";
    pub const ACCELERATION: &str = "Acceleration0to100";
    pub const LENGTH: &str = "Length";
    pub const HEIGHT: &str = "Height";
    pub const GROUND_CLEARANCE: &str = "GroundClearance";
    pub const FRONT_TRACK: &str = "FrontTrack";
    pub const REAR_TRACK: &str = "RearTrack";
    pub const VIN: &str = "VIN";
    pub const DESCRIPTION: &str = "Description";
}

/// Column order of a car record.
pub const CAR_FIELDS: [&str; 28] = [
    field::TITLE,
    field::BRAND,
    field::MODEL,
    field::LISTING_DATE,
    field::PRICE,
    field::LOCATION,
    field::LINK,
    field::YEAR,
    field::GENERATION,
    field::CONDITION,
    field::TRIM,
    field::ENGINE_VOLUME,
    field::ENGINE_TYPE,
    field::TRANSMISSION,
    field::DRIVE_TYPE,
    field::BODY_TYPE,
    field::COLOR,
    field::STEERING_SIDE,
    field::FUEL_TANK_CAPACITY,
    field::FUEL_CONSUMPTION,
    field::ACCELERATION,
    field::LENGTH,
    field::HEIGHT,
    field::GROUND_CLEARANCE,
    field::FRONT_TRACK,
    field::REAR_TRACK,
    field::VIN,
    field::DESCRIPTION,
];

/// Ordered, duplicate-free set of field names every output record carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    fields: Vec<String>,
}

impl FieldSchema {
    /// Build a schema, keeping the first occurrence of any repeated name.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for f in fields {
            let f = f.into();
            if !out.contains(&f) {
                out.push(f);
            }
        }
        FieldSchema { fields: out }
    }

    pub fn cars() -> Self {
        Self::new(CAR_FIELDS)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn car_schema_keeps_declared_order() {
        let schema = FieldSchema::cars();
        assert_eq!(schema.len(), 28);
        assert_eq!(schema.iter().next(), Some("Title"));
        assert_eq!(schema.iter().last(), Some("Description"));
        assert!(schema.contains(field::ACCELERATION));
        assert!(!schema.contains("Mileage"));
    }

    #[test]
    fn duplicates_collapse_to_first() {
        let schema = FieldSchema::new(["A", "B", "A", "C"]);
        let names: Vec<&str> = schema.iter().collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }
}
