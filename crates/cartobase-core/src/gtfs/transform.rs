//! Feed records to target rows.
//!
//! Validation is strict and row-scoped: a record missing what its table
//! cannot do without (a key, coordinates) is dead-lettered with its source
//! location and never reaches the batch. An absent optional member still
//! yields an empty batch, because a full refresh must also clear tables the
//! feed no longer ships.

use crate::error::Result;
use crate::gtfs::feed::{CsvTable, FeedArchive};
use crate::gtfs::model::{
    AgencyRecord, CalendarDateRecord, CalendarRecord, FeedInfoRecord, FrequencyRecord,
    RouteRecord, ShapePointRecord, SqlValue, StopRecord, StopTimeRecord, TableBatch,
    TransferRecord, TripRecord, AGENCY, CALENDAR, CALENDAR_DATES, FEED_INFO, FREQUENCIES,
    ROUTES, SHAPE_LINES, SHAPE_POINTS, STOPS, STOP_TIMES, TRANSFERS, TRIPS,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// A record that failed validation, preserved for inspection.
#[derive(Debug)]
pub struct DeadLetter {
    pub feed: String,
    /// Member and line, e.g. `stops.txt:17`.
    pub source: String,
    pub reason: String,
    pub record: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct TransformOutput {
    /// One batch per target table, in load order.
    pub batches: Vec<TableBatch>,
    pub dead_letters: Vec<DeadLetter>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn miss(field: &str) -> String {
    format!("missing {field}")
}

fn scrub(v: Option<f64>) -> Option<f64> {
    v.filter(|f| !f.is_nan())
}

fn point_wkt(lon: f64, lat: f64) -> String {
    format!("POINT({lon} {lat})")
}

fn line_wkt(coords: &[(f64, f64)]) -> String {
    let parts = coords
        .iter()
        .map(|(lon, lat)| format!("{lon} {lat}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("LINESTRING({parts})")
}

/// Run every record of a member through `build`; failures become dead
/// letters, successes become rows.
fn each_row<T: DeserializeOwned>(
    feed: &str,
    table: Option<CsvTable>,
    out: &mut TransformOutput,
    mut build: impl FnMut(T) -> std::result::Result<Vec<SqlValue>, String>,
) -> Vec<Vec<SqlValue>> {
    let mut rows = Vec::new();
    let Some(table) = table else { return rows };
    for parse in table.rows::<T>() {
        match parse.parsed.and_then(|record| build(record)) {
            Ok(row) => rows.push(row),
            Err(reason) => {
                debug!(feed, source = %parse.source, %reason, "dead-lettering record");
                out.dead_letters.push(DeadLetter {
                    feed: feed.to_string(),
                    source: parse.source,
                    reason,
                    record: parse.raw,
                });
            }
        }
    }
    rows
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

pub fn transform(feed: &str, archive: &mut FeedArchive) -> Result<TransformOutput> {
    let mut out = TransformOutput::default();

    let rows = each_row(feed, archive.table("agency.txt")?, &mut out, |a: AgencyRecord| {
        // single-agency feeds may omit the id; the name then has to serve
        let id = a
            .agency_id
            .clone()
            .or_else(|| a.agency_name.clone())
            .ok_or_else(|| miss("agency_id"))?;
        Ok(vec![
            SqlValue::text(Some(id)),
            SqlValue::text(a.agency_name),
            SqlValue::text(a.agency_url),
            SqlValue::text(a.agency_timezone),
        ])
    });
    out.batches.push(TableBatch { table: &AGENCY, rows });

    let rows = each_row(feed, archive.table("stops.txt")?, &mut out, |s: StopRecord| {
        let stop_id = s.stop_id.ok_or_else(|| miss("stop_id"))?;
        let (lat, lon) = match (scrub(s.stop_lat), scrub(s.stop_lon)) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return Err("stop has no usable coordinates".to_string()),
        };
        Ok(vec![
            SqlValue::text(Some(stop_id)),
            SqlValue::text(s.stop_code),
            SqlValue::text(s.stop_name),
            SqlValue::double(Some(lat)),
            SqlValue::double(Some(lon)),
            SqlValue::integer(s.location_type),
            SqlValue::text(s.parent_station),
            SqlValue::Geometry(Some(point_wkt(lon, lat))),
        ])
    });
    out.batches.push(TableBatch { table: &STOPS, rows });

    let rows = each_row(feed, archive.table("routes.txt")?, &mut out, |r: RouteRecord| {
        let route_id = r.route_id.ok_or_else(|| miss("route_id"))?;
        Ok(vec![
            SqlValue::text(Some(route_id)),
            SqlValue::text(r.agency_id),
            SqlValue::text(r.route_short_name),
            SqlValue::text(r.route_long_name),
            SqlValue::integer(r.route_type),
            SqlValue::text(r.route_color),
        ])
    });
    out.batches.push(TableBatch { table: &ROUTES, rows });

    let rows = each_row(feed, archive.table("trips.txt")?, &mut out, |t: TripRecord| {
        let trip_id = t.trip_id.ok_or_else(|| miss("trip_id"))?;
        Ok(vec![
            SqlValue::text(Some(trip_id)),
            SqlValue::text(t.route_id),
            SqlValue::text(t.service_id),
            SqlValue::text(t.trip_headsign),
            SqlValue::integer(t.direction_id),
            SqlValue::text(t.shape_id),
        ])
    });
    out.batches.push(TableBatch { table: &TRIPS, rows });

    let rows = each_row(
        feed,
        archive.table("stop_times.txt")?,
        &mut out,
        |st: StopTimeRecord| {
            let trip_id = st.trip_id.ok_or_else(|| miss("trip_id"))?;
            let stop_id = st.stop_id.ok_or_else(|| miss("stop_id"))?;
            let sequence = st.stop_sequence.ok_or_else(|| miss("stop_sequence"))?;
            Ok(vec![
                SqlValue::text(Some(trip_id)),
                SqlValue::text(st.arrival_time),
                SqlValue::text(st.departure_time),
                SqlValue::text(Some(stop_id)),
                SqlValue::integer(Some(sequence)),
            ])
        },
    );
    out.batches.push(TableBatch {
        table: &STOP_TIMES,
        rows,
    });

    let rows = each_row(
        feed,
        archive.table("calendar.txt")?,
        &mut out,
        |c: CalendarRecord| {
            let service_id = c.service_id.ok_or_else(|| miss("service_id"))?;
            Ok(vec![
                SqlValue::text(Some(service_id)),
                SqlValue::integer(c.monday),
                SqlValue::integer(c.tuesday),
                SqlValue::integer(c.wednesday),
                SqlValue::integer(c.thursday),
                SqlValue::integer(c.friday),
                SqlValue::integer(c.saturday),
                SqlValue::integer(c.sunday),
                SqlValue::text(c.start_date),
                SqlValue::text(c.end_date),
            ])
        },
    );
    out.batches.push(TableBatch {
        table: &CALENDAR,
        rows,
    });

    let rows = each_row(
        feed,
        archive.table("calendar_dates.txt")?,
        &mut out,
        |cd: CalendarDateRecord| {
            let service_id = cd.service_id.ok_or_else(|| miss("service_id"))?;
            let date = cd.date.ok_or_else(|| miss("date"))?;
            Ok(vec![
                SqlValue::text(Some(service_id)),
                SqlValue::text(Some(date)),
                SqlValue::integer(cd.exception_type),
            ])
        },
    );
    out.batches.push(TableBatch {
        table: &CALENDAR_DATES,
        rows,
    });

    // shape points feed two tables: the raw rows, and a line per shape
    let mut shape_groups: BTreeMap<String, Vec<(i32, f64, f64)>> = BTreeMap::new();
    let rows = each_row(
        feed,
        archive.table("shapes.txt")?,
        &mut out,
        |p: ShapePointRecord| {
            let shape_id = p.shape_id.ok_or_else(|| miss("shape_id"))?;
            let lat = scrub(p.shape_pt_lat).ok_or_else(|| miss("shape_pt_lat"))?;
            let lon = scrub(p.shape_pt_lon).ok_or_else(|| miss("shape_pt_lon"))?;
            let sequence = p.shape_pt_sequence.ok_or_else(|| miss("shape_pt_sequence"))?;
            shape_groups
                .entry(shape_id.clone())
                .or_default()
                .push((sequence, lat, lon));
            Ok(vec![
                SqlValue::text(Some(shape_id)),
                SqlValue::double(Some(lat)),
                SqlValue::double(Some(lon)),
                SqlValue::integer(Some(sequence)),
            ])
        },
    );
    out.batches.push(TableBatch {
        table: &SHAPE_POINTS,
        rows,
    });

    let mut line_rows = Vec::new();
    for (shape_id, mut points) in shape_groups {
        if points.len() < 2 {
            out.dead_letters.push(DeadLetter {
                feed: feed.to_string(),
                source: "shapes.txt".to_string(),
                reason: format!("shape has {} usable point(s), cannot build a line", points.len()),
                record: json!({ "shape_id": shape_id }),
            });
            continue;
        }
        points.sort_by_key(|(sequence, _, _)| *sequence);
        let coords: Vec<(f64, f64)> = points.iter().map(|(_, lat, lon)| (*lon, *lat)).collect();
        line_rows.push(vec![
            SqlValue::text(Some(shape_id)),
            SqlValue::Geometry(Some(line_wkt(&coords))),
        ]);
    }
    out.batches.push(TableBatch {
        table: &SHAPE_LINES,
        rows: line_rows,
    });

    let rows = each_row(
        feed,
        archive.table("frequencies.txt")?,
        &mut out,
        |f: FrequencyRecord| {
            let trip_id = f.trip_id.ok_or_else(|| miss("trip_id"))?;
            let start_time = f.start_time.ok_or_else(|| miss("start_time"))?;
            Ok(vec![
                SqlValue::text(Some(trip_id)),
                SqlValue::text(Some(start_time)),
                SqlValue::text(f.end_time),
                SqlValue::integer(f.headway_secs),
            ])
        },
    );
    out.batches.push(TableBatch {
        table: &FREQUENCIES,
        rows,
    });

    let rows = each_row(
        feed,
        archive.table("transfers.txt")?,
        &mut out,
        |t: TransferRecord| {
            let from = t.from_stop_id.ok_or_else(|| miss("from_stop_id"))?;
            let to = t.to_stop_id.ok_or_else(|| miss("to_stop_id"))?;
            Ok(vec![
                SqlValue::text(Some(from)),
                SqlValue::text(Some(to)),
                SqlValue::integer(t.transfer_type),
                SqlValue::integer(t.min_transfer_time),
            ])
        },
    );
    out.batches.push(TableBatch {
        table: &TRANSFERS,
        rows,
    });

    let rows = each_row(
        feed,
        archive.table("feed_info.txt")?,
        &mut out,
        |fi: FeedInfoRecord| {
            let publisher = fi
                .feed_publisher_name
                .ok_or_else(|| miss("feed_publisher_name"))?;
            Ok(vec![
                SqlValue::text(Some(publisher)),
                SqlValue::text(fi.feed_publisher_url),
                SqlValue::text(fi.feed_lang),
                SqlValue::text(fi.feed_start_date),
                SqlValue::text(fi.feed_end_date),
                SqlValue::text(fi.feed_version),
            ])
        },
    );
    out.batches.push(TableBatch {
        table: &FEED_INFO,
        rows,
    });

    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
