//! GTFS target schema and row values.
//!
//! Every entity table is declared statically: column list, ordered (possibly
//! composite) primary key, optional geometry column. The loader derives DDL
//! and INSERT text from these declarations, and the full-refresh model means
//! none of them is ever written incrementally.

use serde::Deserialize;
use tokio_postgres::types::ToSql;

/// Schema holding all transit tables.
pub const GTFS_SCHEMA: &str = "gtfs";

/// SRID for every derived geometry (GTFS is WGS84 by definition).
pub const GTFS_SRID: u32 = 4326;

// ---------------------------------------------------------------------------
// Table declarations
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: &'static str,
}

#[derive(Debug)]
pub struct GeometryDef {
    pub column: &'static str,
    pub kind: &'static str,
    pub srid: u32,
}

#[derive(Debug)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    /// Ordered; more than one entry declares a composite key.
    pub primary_key: &'static [&'static str],
    pub geometry: Option<GeometryDef>,
}

impl TableDef {
    pub fn qualified(&self) -> String {
        format!("\"{GTFS_SCHEMA}\".\"{}\"", self.name)
    }

    /// All insert columns, geometry last.
    pub fn insert_columns(&self) -> Vec<&'static str> {
        let mut cols: Vec<&'static str> = self.columns.iter().map(|c| c.name).collect();
        if let Some(geom) = &self.geometry {
            cols.push(geom.column);
        }
        cols
    }

    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("\"{}\" {}", c.name, c.sql_type))
            .collect();
        if let Some(geom) = &self.geometry {
            parts.push(format!(
                "\"{}\" geometry({}, {})",
                geom.column, geom.kind, geom.srid
            ));
        }
        let key = self
            .primary_key
            .iter()
            .map(|k| format!("\"{k}\""))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("PRIMARY KEY ({key})"));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.qualified(),
            parts.join(", ")
        )
    }
}

const fn col(name: &'static str, sql_type: &'static str) -> ColumnDef {
    ColumnDef { name, sql_type }
}

pub static AGENCY: TableDef = TableDef {
    name: "agency",
    columns: &[
        col("agency_id", "TEXT"),
        col("agency_name", "TEXT"),
        col("agency_url", "TEXT"),
        col("agency_timezone", "TEXT"),
    ],
    primary_key: &["agency_id"],
    geometry: None,
};

pub static STOPS: TableDef = TableDef {
    name: "stops",
    columns: &[
        col("stop_id", "TEXT"),
        col("stop_code", "TEXT"),
        col("stop_name", "TEXT"),
        col("stop_lat", "DOUBLE PRECISION"),
        col("stop_lon", "DOUBLE PRECISION"),
        col("location_type", "INTEGER"),
        col("parent_station", "TEXT"),
    ],
    primary_key: &["stop_id"],
    geometry: Some(GeometryDef {
        column: "geom",
        kind: "Point",
        srid: GTFS_SRID,
    }),
};

pub static ROUTES: TableDef = TableDef {
    name: "routes",
    columns: &[
        col("route_id", "TEXT"),
        col("agency_id", "TEXT"),
        col("route_short_name", "TEXT"),
        col("route_long_name", "TEXT"),
        col("route_type", "INTEGER"),
        col("route_color", "TEXT"),
    ],
    primary_key: &["route_id"],
    geometry: None,
};

pub static TRIPS: TableDef = TableDef {
    name: "trips",
    columns: &[
        col("trip_id", "TEXT"),
        col("route_id", "TEXT"),
        col("service_id", "TEXT"),
        col("trip_headsign", "TEXT"),
        col("direction_id", "INTEGER"),
        col("shape_id", "TEXT"),
    ],
    primary_key: &["trip_id"],
    geometry: None,
};

pub static STOP_TIMES: TableDef = TableDef {
    name: "stop_times",
    columns: &[
        col("trip_id", "TEXT"),
        col("arrival_time", "TEXT"),
        col("departure_time", "TEXT"),
        col("stop_id", "TEXT"),
        col("stop_sequence", "INTEGER"),
    ],
    primary_key: &["trip_id", "stop_sequence"],
    geometry: None,
};

pub static CALENDAR: TableDef = TableDef {
    name: "calendar",
    columns: &[
        col("service_id", "TEXT"),
        col("monday", "INTEGER"),
        col("tuesday", "INTEGER"),
        col("wednesday", "INTEGER"),
        col("thursday", "INTEGER"),
        col("friday", "INTEGER"),
        col("saturday", "INTEGER"),
        col("sunday", "INTEGER"),
        col("start_date", "TEXT"),
        col("end_date", "TEXT"),
    ],
    primary_key: &["service_id"],
    geometry: None,
};

pub static CALENDAR_DATES: TableDef = TableDef {
    name: "calendar_dates",
    columns: &[
        col("service_id", "TEXT"),
        col("date", "TEXT"),
        col("exception_type", "INTEGER"),
    ],
    primary_key: &["service_id", "date"],
    geometry: None,
};

pub static SHAPE_POINTS: TableDef = TableDef {
    name: "shape_points",
    columns: &[
        col("shape_id", "TEXT"),
        col("shape_pt_lat", "DOUBLE PRECISION"),
        col("shape_pt_lon", "DOUBLE PRECISION"),
        col("shape_pt_sequence", "INTEGER"),
    ],
    primary_key: &["shape_id", "shape_pt_sequence"],
    geometry: None,
};

pub static SHAPE_LINES: TableDef = TableDef {
    name: "shape_lines",
    columns: &[col("shape_id", "TEXT")],
    primary_key: &["shape_id"],
    geometry: Some(GeometryDef {
        column: "geom",
        kind: "LineString",
        srid: GTFS_SRID,
    }),
};

pub static FREQUENCIES: TableDef = TableDef {
    name: "frequencies",
    columns: &[
        col("trip_id", "TEXT"),
        col("start_time", "TEXT"),
        col("end_time", "TEXT"),
        col("headway_secs", "INTEGER"),
    ],
    primary_key: &["trip_id", "start_time"],
    geometry: None,
};

pub static TRANSFERS: TableDef = TableDef {
    name: "transfers",
    columns: &[
        col("from_stop_id", "TEXT"),
        col("to_stop_id", "TEXT"),
        col("transfer_type", "INTEGER"),
        col("min_transfer_time", "INTEGER"),
    ],
    primary_key: &["from_stop_id", "to_stop_id"],
    geometry: None,
};

pub static FEED_INFO: TableDef = TableDef {
    name: "feed_info",
    columns: &[
        col("feed_publisher_name", "TEXT"),
        col("feed_publisher_url", "TEXT"),
        col("feed_lang", "TEXT"),
        col("feed_start_date", "TEXT"),
        col("feed_end_date", "TEXT"),
        col("feed_version", "TEXT"),
    ],
    primary_key: &["feed_publisher_name"],
    geometry: None,
};

/// Every full-refresh table, in load order.
pub fn tables() -> &'static [&'static TableDef] {
    static TABLES: [&TableDef; 12] = [
        &AGENCY,
        &STOPS,
        &ROUTES,
        &TRIPS,
        &STOP_TIMES,
        &CALENDAR,
        &CALENDAR_DATES,
        &SHAPE_POINTS,
        &SHAPE_LINES,
        &FREQUENCIES,
        &TRANSFERS,
        &FEED_INFO,
    ];
    &TABLES
}

// ---------------------------------------------------------------------------
// SqlValue
// ---------------------------------------------------------------------------

/// One cell of a transformed row, already shaped for binding.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Double(Option<f64>),
    Integer(Option<i32>),
    /// WKT; the insert wraps it in `ST_GeomFromText($n, srid)`.
    Geometry(Option<String>),
}

impl SqlValue {
    pub fn text(v: Option<String>) -> Self {
        Self::Text(v.filter(|s| !s.is_empty()))
    }

    /// NaN is indistinguishable from missing as far as SQL is concerned.
    pub fn double(v: Option<f64>) -> Self {
        Self::Double(v.filter(|f| !f.is_nan()))
    }

    pub fn integer(v: Option<i32>) -> Self {
        Self::Integer(v)
    }

    pub fn as_param(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Text(v) => v,
            Self::Double(v) => v,
            Self::Integer(v) => v,
            Self::Geometry(v) => v,
        }
    }
}

/// A full-refresh payload for one table.
#[derive(Debug)]
pub struct TableBatch {
    pub table: &'static TableDef,
    pub rows: Vec<Vec<SqlValue>>,
}

// ---------------------------------------------------------------------------
// Source records
// ---------------------------------------------------------------------------
//
// Everything is optional at parse time; the transform decides which absences
// are dead-letter offences. The csv crate maps empty fields to None.

#[derive(Debug, Deserialize)]
pub struct AgencyRecord {
    #[serde(default)]
    pub agency_id: Option<String>,
    #[serde(default)]
    pub agency_name: Option<String>,
    #[serde(default)]
    pub agency_url: Option<String>,
    #[serde(default)]
    pub agency_timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StopRecord {
    #[serde(default)]
    pub stop_id: Option<String>,
    #[serde(default)]
    pub stop_code: Option<String>,
    #[serde(default)]
    pub stop_name: Option<String>,
    #[serde(default)]
    pub stop_lat: Option<f64>,
    #[serde(default)]
    pub stop_lon: Option<f64>,
    #[serde(default)]
    pub location_type: Option<i32>,
    #[serde(default)]
    pub parent_station: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RouteRecord {
    #[serde(default)]
    pub route_id: Option<String>,
    #[serde(default)]
    pub agency_id: Option<String>,
    #[serde(default)]
    pub route_short_name: Option<String>,
    #[serde(default)]
    pub route_long_name: Option<String>,
    #[serde(default)]
    pub route_type: Option<i32>,
    #[serde(default)]
    pub route_color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TripRecord {
    #[serde(default)]
    pub trip_id: Option<String>,
    #[serde(default)]
    pub route_id: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub trip_headsign: Option<String>,
    #[serde(default)]
    pub direction_id: Option<i32>,
    #[serde(default)]
    pub shape_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StopTimeRecord {
    #[serde(default)]
    pub trip_id: Option<String>,
    #[serde(default)]
    pub arrival_time: Option<String>,
    #[serde(default)]
    pub departure_time: Option<String>,
    #[serde(default)]
    pub stop_id: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarRecord {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub monday: Option<i32>,
    #[serde(default)]
    pub tuesday: Option<i32>,
    #[serde(default)]
    pub wednesday: Option<i32>,
    #[serde(default)]
    pub thursday: Option<i32>,
    #[serde(default)]
    pub friday: Option<i32>,
    #[serde(default)]
    pub saturday: Option<i32>,
    #[serde(default)]
    pub sunday: Option<i32>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarDateRecord {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub exception_type: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ShapePointRecord {
    #[serde(default)]
    pub shape_id: Option<String>,
    #[serde(default)]
    pub shape_pt_lat: Option<f64>,
    #[serde(default)]
    pub shape_pt_lon: Option<f64>,
    #[serde(default)]
    pub shape_pt_sequence: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct FrequencyRecord {
    #[serde(default)]
    pub trip_id: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub headway_secs: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRecord {
    #[serde(default)]
    pub from_stop_id: Option<String>,
    #[serde(default)]
    pub to_stop_id: Option<String>,
    #[serde(default)]
    pub transfer_type: Option<i32>,
    #[serde(default)]
    pub min_transfer_time: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct FeedInfoRecord {
    #[serde(default)]
    pub feed_publisher_name: Option<String>,
    #[serde(default)]
    pub feed_publisher_url: Option<String>,
    #[serde(default)]
    pub feed_lang: Option<String>,
    #[serde(default)]
    pub feed_start_date: Option<String>,
    #[serde(default)]
    pub feed_end_date: Option<String>,
    #[serde(default)]
    pub feed_version: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
