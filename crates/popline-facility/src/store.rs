//! Synchronous query functions over a single connection.

use chrono::NaiveDate;
use popline_types::{
    Facility, Inquiry, NewFacility, NewInquiry, NewReservation, NewSection, Reservation, Section,
    SectionFilter, SectionStatus,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::FacilityError;

const SECTION_COLUMNS: &str = "id, facility_id, name, floor, area, rent_price, category, status, \
     features, description";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Registers a facility under a fresh id.
///
/// # Errors
///
/// Returns `FacilityError::Database` if the insert fails.
pub fn create_facility(conn: &Connection, new: &NewFacility) -> Result<Facility, FacilityError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO facilities (id, name, address, phone, hours) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, new.name, new.address, new.phone, new.hours],
    )?;
    Ok(Facility {
        id,
        name: new.name.clone(),
        address: new.address.clone(),
        phone: new.phone.clone(),
        hours: new.hours.clone(),
    })
}

/// The facility the line answers for: the first one registered.
pub fn get_facility(conn: &Connection) -> Result<Option<Facility>, FacilityError> {
    let facility = conn
        .query_row(
            "SELECT id, name, address, phone, hours FROM facilities
             ORDER BY created_at ASC, rowid ASC LIMIT 1",
            [],
            |row| {
                Ok(Facility {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    address: row.get(2)?,
                    phone: row.get(3)?,
                    hours: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(facility)
}

/// Adds a section to a facility and returns it as stored.
///
/// # Errors
///
/// Returns `FacilityError::Database` if the insert fails, e.g. when
/// `facility_id` does not exist.
pub fn create_section(
    conn: &Connection,
    facility_id: &str,
    new: &NewSection,
) -> Result<Section, FacilityError> {
    let id = Uuid::new_v4().to_string();
    let features = serde_json::to_string(&new.features)?;
    conn.execute(
        "INSERT INTO sections (
            id, facility_id, name, floor, area, rent_price, category, status,
            features, description
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            facility_id,
            new.name,
            new.floor,
            new.area,
            new.rent_price,
            new.category,
            new.status.as_str(),
            features,
            new.description,
        ],
    )?;
    get_section(conn, &id)
}

/// # Errors
///
/// Returns `FacilityError::NotFound` if no section has this id.
pub fn get_section(conn: &Connection, id: &str) -> Result<Section, FacilityError> {
    conn.query_row(
        &format!("SELECT {SECTION_COLUMNS} FROM sections WHERE id = ?1"),
        [id],
        map_row_to_section,
    )
    .optional()?
    .ok_or_else(|| FacilityError::NotFound(id.to_string()))
}

/// Sections ordered by name, narrowed by `filter`.
pub fn list_sections(
    conn: &Connection,
    filter: &SectionFilter,
) -> Result<Vec<Section>, FacilityError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SECTION_COLUMNS} FROM sections
         WHERE (?1 IS NULL OR category = ?1)
           AND (?2 = 0 OR status = 'active')
         ORDER BY name ASC"
    ))?;
    let rows = stmt.query_map(
        params![filter.category, filter.active_only],
        map_row_to_section,
    )?;

    let mut sections = Vec::new();
    for row in rows {
        sections.push(row?);
    }
    Ok(sections)
}

/// Looks a section up by spoken name: an exact match wins, otherwise the
/// first section (by name) whose name contains `name`.
pub fn find_section_by_name(
    conn: &Connection,
    name: &str,
) -> Result<Option<Section>, FacilityError> {
    let exact = conn
        .query_row(
            &format!("SELECT {SECTION_COLUMNS} FROM sections WHERE name = ?1 LIMIT 1"),
            [name],
            map_row_to_section,
        )
        .optional()?;
    if exact.is_some() {
        return Ok(exact);
    }

    // instr() rather than LIKE so '%' and '_' in speech are literal
    let partial = conn
        .query_row(
            &format!(
                "SELECT {SECTION_COLUMNS} FROM sections
                 WHERE instr(name, ?1) > 0 ORDER BY name ASC LIMIT 1"
            ),
            [name],
            map_row_to_section,
        )
        .optional()?;
    Ok(partial)
}

/// Books `[start_date, end_date]` for a section.
///
/// # Errors
///
/// Returns `FacilityError::InvalidRange` if the end date precedes the start
/// date, or `FacilityError::Database` if the insert fails.
pub fn create_reservation(
    conn: &Connection,
    new: &NewReservation,
) -> Result<Reservation, FacilityError> {
    if new.end_date < new.start_date {
        return Err(FacilityError::InvalidRange {
            start: new.start_date,
            end: new.end_date,
        });
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO reservations (id, section_id, start_date, end_date, tenant_name, purpose, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            new.section_id,
            new.start_date.format(DATE_FORMAT).to_string(),
            new.end_date.format(DATE_FORMAT).to_string(),
            new.tenant_name,
            new.purpose,
            new.note,
        ],
    )?;

    Ok(Reservation {
        id,
        section_id: new.section_id.clone(),
        start_date: new.start_date,
        end_date: new.end_date,
        tenant_name: new.tenant_name.clone(),
        purpose: new.purpose.clone(),
        note: new.note.clone(),
    })
}

/// Reservations of a section that touch `[from, to]`, earliest first.
pub fn list_reservations(
    conn: &Connection,
    section_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<Reservation>, FacilityError> {
    let mut stmt = conn.prepare(
        "SELECT id, section_id, start_date, end_date, tenant_name, purpose, note
         FROM reservations
         WHERE section_id = ?1 AND start_date <= ?3 AND end_date >= ?2
         ORDER BY start_date ASC",
    )?;
    let rows = stmt.query_map(
        params![
            section_id,
            from.format(DATE_FORMAT).to_string(),
            to.format(DATE_FORMAT).to_string()
        ],
        map_row_to_reservation,
    )?;

    let mut reservations = Vec::new();
    for row in rows {
        reservations.push(row?);
    }
    Ok(reservations)
}

/// True iff no reservation of the section overlaps `[start, end]`, both ends
/// inclusive. ISO dates compare correctly as text.
///
/// # Arguments
///
/// * `section_id` - Id of the section, not its spoken name.
/// * `start`, `end` - Requested first and last day of use.
pub fn is_section_available(
    conn: &Connection,
    section_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<bool, FacilityError> {
    let overlapping: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM reservations
            WHERE section_id = ?1 AND start_date <= ?3 AND end_date >= ?2
        )",
        params![
            section_id,
            start.format(DATE_FORMAT).to_string(),
            end.format(DATE_FORMAT).to_string()
        ],
        |row| row.get(0),
    )?;
    Ok(!overlapping)
}

/// Records a caller inquiry with status `new`.
///
/// # Errors
///
/// Returns `FacilityError::Database` if the insert fails, e.g. when the
/// section does not exist.
pub fn create_inquiry(conn: &Connection, new: &NewInquiry) -> Result<Inquiry, FacilityError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO inquiries (id, section_id, caller_name, caller_phone, inquiry_type, message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            new.section_id,
            new.caller_name,
            new.caller_phone,
            new.inquiry_type,
            new.message,
        ],
    )?;

    conn.query_row(
        "SELECT id, section_id, caller_name, caller_phone, inquiry_type, message, status, created_at
         FROM inquiries WHERE id = ?1",
        [&id],
        map_row_to_inquiry,
    )
    .map_err(FacilityError::from)
}

/// Inquiries for a section, newest first.
pub fn list_inquiries(conn: &Connection, section_id: &str) -> Result<Vec<Inquiry>, FacilityError> {
    let mut stmt = conn.prepare(
        "SELECT id, section_id, caller_name, caller_phone, inquiry_type, message, status, created_at
         FROM inquiries WHERE section_id = ?1
         ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt.query_map([section_id], map_row_to_inquiry)?;

    let mut inquiries = Vec::new();
    for row in rows {
        inquiries.push(row?);
    }
    Ok(inquiries)
}

fn map_row_to_section(row: &Row) -> rusqlite::Result<Section> {
    let status: String = row.get(7)?;
    let features: String = row.get(8)?;
    let features: Vec<String> = serde_json::from_str(&features)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(Section {
        id: row.get(0)?,
        facility_id: row.get(1)?,
        name: row.get(2)?,
        floor: row.get(3)?,
        area: row.get(4)?,
        rent_price: row.get(5)?,
        category: row.get(6)?,
        status: SectionStatus::parse(&status),
        features,
        description: row.get(9)?,
    })
}

fn map_row_to_reservation(row: &Row) -> rusqlite::Result<Reservation> {
    Ok(Reservation {
        id: row.get(0)?,
        section_id: row.get(1)?,
        start_date: date_column(row, 2)?,
        end_date: date_column(row, 3)?,
        tenant_name: row.get(4)?,
        purpose: row.get(5)?,
        note: row.get(6)?,
    })
}

fn map_row_to_inquiry(row: &Row) -> rusqlite::Result<Inquiry> {
    Ok(Inquiry {
        id: row.get(0)?,
        section_id: row.get(1)?,
        caller_name: row.get(2)?,
        caller_phone: row.get(3)?,
        inquiry_type: row.get(4)?,
        message: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn date_column(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
