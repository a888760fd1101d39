//! Service registry: lookups, combined-service synthesis and the edit log.

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{now, Database};
use crate::error::{Error, Result};
use crate::services::{
    KeyUpdate, Service, ServiceConfig, ServiceEdit, ServiceIdentifier, ServiceKey, ServiceType,
};

/// A stored service with its row id.
#[derive(Debug, Clone)]
pub(crate) struct ServiceRow {
    pub id: i64,
    pub service: Service,
}

fn row_to_service(
    key: Vec<u8>,
    name: String,
    config_json: &str,
) -> Result<Service> {
    let config: ServiceConfig = serde_json::from_str(config_json)?;
    Ok(Service {
        identifier: ServiceIdentifier::new(ServiceKey::new(key), config.service_type(), name),
        config,
    })
}

pub(crate) fn all_services(conn: &Connection) -> Result<Vec<ServiceRow>> {
    let mut stmt = conn.prepare(
        "SELECT service_id, service_key, name, config FROM services ORDER BY service_id",
    )?;
    let rows: Vec<(i64, Vec<u8>, String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
        .collect::<rusqlite::Result<_>>()?;

    rows.into_iter()
        .map(|(id, key, name, config)| {
            Ok(ServiceRow {
                id,
                service: row_to_service(key, name, &config)?,
            })
        })
        .collect()
}

pub(crate) fn load_service(conn: &Connection, key: &ServiceKey) -> Result<Option<ServiceRow>> {
    let row: Option<(i64, Vec<u8>, String, String)> = conn
        .query_row(
            "SELECT service_id, service_key, name, config FROM services WHERE service_key = ?",
            [key.as_bytes()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    match row {
        Some((id, key, name, config)) => Ok(Some(ServiceRow {
            id,
            service: row_to_service(key, name, &config)?,
        })),
        None => Ok(None),
    }
}

pub(crate) fn require_service(conn: &Connection, key: &ServiceKey) -> Result<ServiceRow> {
    load_service(conn, key)?.ok_or_else(|| Error::UnknownService(key.to_string()))
}

pub(crate) fn local_file_service_id(conn: &Connection) -> Result<i64> {
    Ok(require_service(conn, &ServiceKey::local_file())?.id)
}

fn synthesized(service_type: ServiceType) -> Option<Service> {
    let (identifier, config) = match service_type {
        ServiceType::CombinedFile => (ServiceIdentifier::combined_file(), ServiceConfig::CombinedFile),
        ServiceType::CombinedTag => (ServiceIdentifier::combined_tag(), ServiceConfig::CombinedTag),
        _ => return None,
    };
    Some(Service { identifier, config })
}

fn synthesized_by_key(key: &ServiceKey) -> Option<Service> {
    if *key == ServiceKey::combined_file() {
        synthesized(ServiceType::CombinedFile)
    } else if *key == ServiceKey::combined_tag() {
        synthesized(ServiceType::CombinedTag)
    } else {
        None
    }
}

/// Row ids of the file services a query over `key` covers. The combined
/// file service expands to every stored file service.
pub(crate) fn file_scope(conn: &Connection, key: &ServiceKey) -> Result<Vec<i64>> {
    scope(conn, key, ServiceType::CombinedFile, ServiceType::is_file_service, "file")
}

/// Row ids of the tag services a query over `key` covers. The combined tag
/// service expands to every stored tag service.
pub(crate) fn tag_scope(conn: &Connection, key: &ServiceKey) -> Result<Vec<i64>> {
    scope(conn, key, ServiceType::CombinedTag, ServiceType::is_tag_service, "tag")
}

fn scope(
    conn: &Connection,
    key: &ServiceKey,
    combined: ServiceType,
    accepts: fn(&ServiceType) -> bool,
    what: &str,
) -> Result<Vec<i64>> {
    if let Some(service) = synthesized_by_key(key) {
        if service.service_type() != combined {
            return Err(Error::InvalidPredicate(format!("{} is not a {} service", key, what)));
        }
        return Ok(all_services(conn)?
            .into_iter()
            .filter(|row| accepts(&row.service.service_type()))
            .map(|row| row.id)
            .collect());
    }

    let row = require_service(conn, key)?;
    if !accepts(&row.service.service_type()) {
        return Err(Error::InvalidPredicate(format!("{} is not a {} service", key, what)));
    }
    Ok(vec![row.id])
}

fn key_in_use(conn: &Connection, key: &ServiceKey) -> Result<bool> {
    let used: bool = conn.query_row(
        r#"
        SELECT EXISTS(SELECT 1 FROM services WHERE service_key = ?1)
            OR EXISTS(SELECT 1 FROM retired_service_keys WHERE service_key = ?1)
        "#,
        [key.as_bytes()],
        |row| row.get(0),
    )?;
    Ok(used || synthesized_by_key(key).is_some())
}

fn insert_service(conn: &Connection, service: &Service) -> Result<i64> {
    conn.execute(
        "INSERT INTO services (service_key, service_type, name, config) VALUES (?, ?, ?, ?)",
        params![
            service.key().as_bytes(),
            service.service_type().as_str(),
            service.identifier.name,
            serde_json::to_string(&service.config)?,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn retire_key(conn: &Connection, key: &ServiceKey) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO retired_service_keys (service_key, retired_at) VALUES (?, ?)",
        params![key.as_bytes(), now()],
    )?;
    Ok(())
}

/// Create the local file and tag services if missing. Returns how many
/// were created.
pub(crate) fn seed_local_services(conn: &Connection) -> Result<usize> {
    let mut seeded = 0;
    for (identifier, config) in [
        (ServiceIdentifier::local_file(), ServiceConfig::LocalFile),
        (ServiceIdentifier::local_tag(), ServiceConfig::LocalTag),
    ] {
        if load_service(conn, &identifier.key)?.is_none() {
            insert_service(conn, &Service { identifier, config })?;
            seeded += 1;
        }
    }
    Ok(seeded)
}

/// Find the stored service an edit-log entry refers to. The key decides;
/// the declared type must agree with what is stored.
fn require_target(conn: &Connection, identifier: &ServiceIdentifier) -> Result<ServiceRow> {
    if identifier.service_type.is_combined() {
        return Err(Error::InvalidService(format!(
            "{} is a combined service and cannot be edited",
            identifier.key
        )));
    }
    let row = require_service(conn, &identifier.key)?;
    if row.service.service_type() != identifier.service_type {
        return Err(Error::UnknownService(format!(
            "{} is not a {} service",
            identifier.key, identifier.service_type
        )));
    }
    Ok(row)
}

fn apply_edit(conn: &Connection, entry: &ServiceEdit) -> Result<()> {
    match entry {
        ServiceEdit::Add { identifier, credentials, extra_info } => {
            let service_type = identifier.service_type;
            if service_type.is_combined() || service_type.is_local_store() {
                return Err(Error::InvalidService(format!(
                    "{} services cannot be added",
                    service_type
                )));
            }
            let config = ServiceConfig::assemble(service_type, credentials.clone(), extra_info.clone())?;
            if key_in_use(conn, &identifier.key)? {
                return Err(Error::DuplicateService(identifier.key.to_string()));
            }
            insert_service(conn, &Service { identifier: identifier.clone(), config })?;
            debug!(key = %identifier.key, service_type = %service_type, "Added service");
        }
        ServiceEdit::Edit { old, new } => {
            let row = require_target(conn, old)?;
            let service_type = row.service.service_type();

            if service_type.is_local_store()
                && (new.key != KeyUpdate::Keep
                    || new.credentials.is_some()
                    || new.extra_info.is_some())
            {
                return Err(Error::InvalidService(format!(
                    "{} can only be renamed",
                    row.service.key()
                )));
            }

            let identifier = new.identifier(&row.service.identifier);
            if identifier.key != *row.service.key() {
                if key_in_use(conn, &identifier.key)? {
                    return Err(Error::DuplicateService(identifier.key.to_string()));
                }
                retire_key(conn, row.service.key())?;
            }

            let config = ServiceConfig::assemble(
                service_type,
                new.credentials.clone().or_else(|| row.service.config.credentials().cloned()),
                new.extra_info.clone().or_else(|| row.service.config.extra_info()),
            )?;

            conn.execute(
                "UPDATE services SET service_key = ?, name = ?, config = ? WHERE service_id = ?",
                params![
                    identifier.key.as_bytes(),
                    identifier.name,
                    serde_json::to_string(&config)?,
                    row.id,
                ],
            )?;
            debug!(old = %row.service.key(), new = %identifier.key, "Edited service");
        }
        ServiceEdit::Delete(identifier) => {
            let row = require_target(conn, identifier)?;
            if row.service.service_type().is_local_store() {
                return Err(Error::InvalidService(format!(
                    "{} cannot be deleted",
                    row.service.key()
                )));
            }
            for table in ["current_files", "pending_files", "mappings", "ratings"] {
                conn.execute(&format!("DELETE FROM {} WHERE service_id = ?", table), [row.id])?;
            }
            conn.execute("DELETE FROM services WHERE service_id = ?", [row.id])?;
            retire_key(conn, row.service.key())?;
            debug!(key = %row.service.key(), "Deleted service");
        }
    }
    Ok(())
}

impl Database {
    /// Identifiers of every service whose type is in `types`. Combined
    /// services are included when their type is requested.
    pub fn service_identifiers(
        &self,
        types: &BTreeSet<ServiceType>,
    ) -> Result<BTreeSet<ServiceIdentifier>> {
        Ok(self
            .services(types)?
            .into_iter()
            .map(|service| service.identifier)
            .collect())
    }

    /// Full records of every service whose type is in `types`.
    pub fn services(&self, types: &BTreeSet<ServiceType>) -> Result<Vec<Service>> {
        let mut services: Vec<Service> = all_services(&self.conn)?
            .into_iter()
            .map(|row| row.service)
            .filter(|service| types.contains(&service.service_type()))
            .collect();
        services.extend(types.iter().filter_map(|ty| synthesized(*ty)));
        Ok(services)
    }

    pub fn service(&self, key: &ServiceKey) -> Result<Service> {
        if let Some(service) = synthesized_by_key(key) {
            return Ok(service);
        }
        Ok(require_service(&self.conn, key)?.service)
    }

    /// Apply an ordered edit log. Either every entry applies or none does.
    pub fn apply_edit_log(&mut self, entries: &[ServiceEdit]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for entry in entries {
            apply_edit(&tx, entry)?;
        }
        tx.commit()?;
        info!(entries = entries.len(), "Applied service edit log");
        Ok(())
    }
}
