//! PostgreSQL trust store.
//!
//! Schema is bootstrapped at startup (`CREATE TABLE IF NOT EXISTS`); the
//! unique index on `fingerprint` is what makes concurrent duplicate inserts
//! collapse. All list-valued attributes are stored as JSON text.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::{
    CertificateFilter, CertificateStore, CrlStore, IcaoVersionStore, InsertOutcome,
    PaVerificationStore, ReconciliationStore, ReconciliationSummary, SyncStatusStore, UploadStore,
};
use crate::config::DatabaseConfig;
use crate::error::{PkdError, Result};
use crate::models::{
    CertDescriptor, CertType, CertificateRecord, CountryCounts, CrlRecord, IcaoCollection,
    IcaoVersion, IcaoVersionStatus, IngestCounters, PaVerification, ReconciliationFailure,
    RevokedEntry, SyncStatus, UploadedFile,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS certificate (
        id UUID PRIMARY KEY,
        fingerprint TEXT NOT NULL UNIQUE,
        der BYTEA NOT NULL,
        cert_type TEXT NOT NULL,
        country TEXT NOT NULL,
        subject_dn TEXT NOT NULL,
        issuer_dn TEXT NOT NULL,
        subject_dn_normalized TEXT NOT NULL,
        issuer_dn_normalized TEXT NOT NULL,
        serial TEXT NOT NULL,
        not_before TIMESTAMPTZ NOT NULL,
        not_after TIMESTAMPTZ NOT NULL,
        signature_algorithm_oid TEXT NOT NULL,
        signature_hash_algorithm TEXT NOT NULL,
        public_key_algorithm TEXT NOT NULL,
        public_key_size INTEGER,
        public_key_curve TEXT,
        ski TEXT,
        aki TEXT,
        is_ca BOOLEAN NOT NULL,
        path_len_constraint INTEGER,
        key_usage TEXT NOT NULL,
        extended_key_usage TEXT NOT NULL,
        crl_distribution_points TEXT NOT NULL,
        ocsp_url TEXT,
        self_signed BOOLEAN NOT NULL,
        source_verified BOOLEAN NOT NULL,
        stored_in_directory BOOLEAN NOT NULL,
        deleted BOOLEAN NOT NULL,
        first_ingested_at TIMESTAMPTZ NOT NULL,
        source_upload_id UUID
    )",
    "CREATE INDEX IF NOT EXISTS idx_certificate_subject
        ON certificate (subject_dn_normalized)",
    "CREATE INDEX IF NOT EXISTS idx_certificate_type_country
        ON certificate (cert_type, country)",
    "CREATE TABLE IF NOT EXISTS crl (
        id UUID PRIMARY KEY,
        fingerprint TEXT NOT NULL UNIQUE,
        der BYTEA NOT NULL,
        issuer_dn TEXT NOT NULL,
        issuer_dn_normalized TEXT NOT NULL,
        country TEXT NOT NULL,
        this_update TIMESTAMPTZ NOT NULL,
        next_update TIMESTAMPTZ,
        crl_number TEXT,
        revoked TEXT NOT NULL,
        stored_in_directory BOOLEAN NOT NULL,
        first_ingested_at TIMESTAMPTZ NOT NULL,
        source_upload_id UUID
    )",
    "CREATE INDEX IF NOT EXISTS idx_crl_issuer ON crl (issuer_dn_normalized, country)",
    "CREATE TABLE IF NOT EXISTS uploaded_file (
        id UUID PRIMARY KEY,
        original_filename TEXT NOT NULL,
        canonical_filename TEXT NOT NULL,
        content_sha256 TEXT NOT NULL UNIQUE,
        size_bytes BIGINT NOT NULL,
        format TEXT NOT NULL,
        status TEXT NOT NULL,
        csca_count INTEGER NOT NULL,
        dsc_count INTEGER NOT NULL,
        dsc_nc_count INTEGER NOT NULL,
        mlsc_count INTEGER NOT NULL,
        dvl_signer_count INTEGER NOT NULL,
        link_count INTEGER NOT NULL,
        crl_count INTEGER NOT NULL,
        master_list_count INTEGER NOT NULL,
        duplicate_count INTEGER NOT NULL,
        error_count INTEGER NOT NULL,
        collection_number TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        completed_at TIMESTAMPTZ,
        error_message TEXT
    )",
    "CREATE TABLE IF NOT EXISTS sync_status (
        id UUID PRIMARY KEY,
        checked_at TIMESTAMPTZ NOT NULL,
        csca_db BIGINT NOT NULL,
        dsc_db BIGINT NOT NULL,
        dsc_nc_db BIGINT NOT NULL,
        crl_db BIGINT NOT NULL,
        csca_ldap BIGINT NOT NULL,
        dsc_ldap BIGINT NOT NULL,
        dsc_nc_ldap BIGINT NOT NULL,
        crl_ldap BIGINT NOT NULL,
        csca_discrepancy BIGINT NOT NULL,
        dsc_discrepancy BIGINT NOT NULL,
        dsc_nc_discrepancy BIGINT NOT NULL,
        crl_discrepancy BIGINT NOT NULL,
        total_discrepancy BIGINT NOT NULL,
        sync_required BOOLEAN NOT NULL,
        country_breakdown TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS icao_pkd_versions (
        id UUID PRIMARY KEY,
        collection TEXT NOT NULL,
        filename TEXT NOT NULL,
        version INTEGER NOT NULL,
        status TEXT NOT NULL,
        detected_at TIMESTAMPTZ NOT NULL,
        notified BOOLEAN NOT NULL,
        upload_id UUID,
        UNIQUE (collection, version)
    )",
    "CREATE TABLE IF NOT EXISTS pa_verification (
        id UUID PRIMARY KEY,
        issuing_country TEXT,
        document_number TEXT,
        sod_hash TEXT NOT NULL,
        dsc_subject TEXT,
        dsc_serial TEXT,
        dsc_issuer TEXT,
        dsc_fingerprint TEXT,
        csca_subject TEXT,
        csca_serial TEXT,
        csca_issuer TEXT,
        csca_fingerprint TEXT,
        trust_chain_valid BOOLEAN,
        sod_signature_valid BOOLEAN,
        dg_hashes_valid BOOLEAN,
        crl_clean BOOLEAN,
        status TEXT NOT NULL,
        message TEXT NOT NULL,
        client_ip TEXT,
        user_agent TEXT,
        requested_at TIMESTAMPTZ NOT NULL,
        completed_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS reconciliation_summary (
        id UUID PRIMARY KEY,
        started_at TIMESTAMPTZ NOT NULL,
        finished_at TIMESTAMPTZ,
        additions INTEGER NOT NULL,
        deletions INTEGER NOT NULL,
        failures INTEGER NOT NULL,
        status TEXT NOT NULL,
        message TEXT
    )",
    "CREATE TABLE IF NOT EXISTS reconciliation_log (
        id UUID PRIMARY KEY,
        summary_id UUID NOT NULL,
        cert_type TEXT NOT NULL,
        operation TEXT NOT NULL,
        country TEXT NOT NULL,
        subject TEXT NOT NULL,
        error TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
];

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with the configured pool bounds and bootstrap the schema.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = format!(
            "postgres://{}:{}@{}:{}/{}",
            config.user, config.password, config.host, config.port, config.name
        );
        let pool = PgPoolOptions::new()
            .min_connections(config.pool_min)
            .max_connections(config.pool_max)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .map_err(|e| PkdError::Store(format!("cannot connect to database: {e}")))?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(PgStore { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn json_vec(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn parse_json_vec(text: &str) -> Vec<String> {
    serde_json::from_str(text).unwrap_or_default()
}

fn certificate_from_row(row: &PgRow) -> Result<CertificateRecord> {
    Ok(CertificateRecord {
        id: row.try_get("id")?,
        fingerprint: row.try_get("fingerprint")?,
        der: row.try_get("der")?,
        cert_type: row.try_get::<String, _>("cert_type")?.parse()?,
        country: row.try_get("country")?,
        subject_dn: row.try_get("subject_dn")?,
        issuer_dn: row.try_get("issuer_dn")?,
        subject_dn_normalized: row.try_get("subject_dn_normalized")?,
        issuer_dn_normalized: row.try_get("issuer_dn_normalized")?,
        serial: row.try_get("serial")?,
        not_before: row.try_get("not_before")?,
        not_after: row.try_get("not_after")?,
        signature_algorithm_oid: row.try_get("signature_algorithm_oid")?,
        signature_hash_algorithm: row.try_get("signature_hash_algorithm")?,
        public_key_algorithm: row.try_get("public_key_algorithm")?,
        public_key_size: row
            .try_get::<Option<i32>, _>("public_key_size")?
            .map(|v| v as u32),
        public_key_curve: row.try_get("public_key_curve")?,
        ski: row.try_get("ski")?,
        aki: row.try_get("aki")?,
        is_ca: row.try_get("is_ca")?,
        path_len_constraint: row
            .try_get::<Option<i32>, _>("path_len_constraint")?
            .map(|v| v as u32),
        key_usage: parse_json_vec(&row.try_get::<String, _>("key_usage")?),
        extended_key_usage: parse_json_vec(&row.try_get::<String, _>("extended_key_usage")?),
        crl_distribution_points: parse_json_vec(
            &row.try_get::<String, _>("crl_distribution_points")?,
        ),
        ocsp_url: row.try_get("ocsp_url")?,
        self_signed: row.try_get("self_signed")?,
        source_verified: row.try_get("source_verified")?,
        stored_in_directory: row.try_get("stored_in_directory")?,
        deleted: row.try_get("deleted")?,
        first_ingested_at: row.try_get("first_ingested_at")?,
        source_upload_id: row.try_get("source_upload_id")?,
    })
}

fn crl_from_row(row: &PgRow) -> Result<CrlRecord> {
    let revoked: Vec<RevokedEntry> =
        serde_json::from_str(&row.try_get::<String, _>("revoked")?).unwrap_or_default();
    Ok(CrlRecord {
        id: row.try_get("id")?,
        fingerprint: row.try_get("fingerprint")?,
        der: row.try_get("der")?,
        issuer_dn: row.try_get("issuer_dn")?,
        issuer_dn_normalized: row.try_get("issuer_dn_normalized")?,
        country: row.try_get("country")?,
        this_update: row.try_get("this_update")?,
        next_update: row.try_get("next_update")?,
        crl_number: row.try_get("crl_number")?,
        revoked,
        stored_in_directory: row.try_get("stored_in_directory")?,
        first_ingested_at: row.try_get("first_ingested_at")?,
        source_upload_id: row.try_get("source_upload_id")?,
    })
}

fn upload_from_row(row: &PgRow) -> Result<UploadedFile> {
    Ok(UploadedFile {
        id: row.try_get("id")?,
        original_filename: row.try_get("original_filename")?,
        canonical_filename: row.try_get("canonical_filename")?,
        content_sha256: row.try_get("content_sha256")?,
        size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
        format: row.try_get::<String, _>("format")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        counters: IngestCounters {
            csca: row.try_get::<i32, _>("csca_count")? as u32,
            dsc: row.try_get::<i32, _>("dsc_count")? as u32,
            dsc_nc: row.try_get::<i32, _>("dsc_nc_count")? as u32,
            mlsc: row.try_get::<i32, _>("mlsc_count")? as u32,
            dvl_signer: row.try_get::<i32, _>("dvl_signer_count")? as u32,
            link: row.try_get::<i32, _>("link_count")? as u32,
            crl: row.try_get::<i32, _>("crl_count")? as u32,
            master_lists: row.try_get::<i32, _>("master_list_count")? as u32,
            duplicates: row.try_get::<i32, _>("duplicate_count")? as u32,
            errors: row.try_get::<i32, _>("error_count")? as u32,
        },
        collection_number: row.try_get("collection_number")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
    })
}

fn descriptor_from_row(row: &PgRow, prefix: &str) -> Result<Option<CertDescriptor>> {
    let subject: Option<String> = row.try_get(format!("{prefix}_subject").as_str())?;
    match subject {
        Some(subject_dn) => Ok(Some(CertDescriptor {
            subject_dn,
            serial: row
                .try_get::<Option<String>, _>(format!("{prefix}_serial").as_str())?
                .unwrap_or_default(),
            issuer_dn: row
                .try_get::<Option<String>, _>(format!("{prefix}_issuer").as_str())?
                .unwrap_or_default(),
            fingerprint: row
                .try_get::<Option<String>, _>(format!("{prefix}_fingerprint").as_str())?
                .unwrap_or_default(),
        })),
        None => Ok(None),
    }
}

#[async_trait]
impl CertificateStore for PgStore {
    async fn insert_certificate_if_absent(
        &self,
        cert: &CertificateRecord,
    ) -> Result<InsertOutcome> {
        let result = sqlx::query(
            "INSERT INTO certificate (
                id, fingerprint, der, cert_type, country, subject_dn, issuer_dn,
                subject_dn_normalized, issuer_dn_normalized, serial, not_before,
                not_after, signature_algorithm_oid, signature_hash_algorithm,
                public_key_algorithm, public_key_size, public_key_curve, ski, aki,
                is_ca, path_len_constraint, key_usage, extended_key_usage,
                crl_distribution_points, ocsp_url, self_signed, source_verified,
                stored_in_directory, deleted, first_ingested_at, source_upload_id
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,
                      $18,$19,$20,$21,$22,$23,$24,$25,$26,$27,$28,$29,$30,$31)
            ON CONFLICT (fingerprint) DO NOTHING",
        )
        .bind(cert.id)
        .bind(&cert.fingerprint)
        .bind(&cert.der)
        .bind(cert.cert_type.as_str())
        .bind(&cert.country)
        .bind(&cert.subject_dn)
        .bind(&cert.issuer_dn)
        .bind(&cert.subject_dn_normalized)
        .bind(&cert.issuer_dn_normalized)
        .bind(&cert.serial)
        .bind(cert.not_before)
        .bind(cert.not_after)
        .bind(&cert.signature_algorithm_oid)
        .bind(&cert.signature_hash_algorithm)
        .bind(&cert.public_key_algorithm)
        .bind(cert.public_key_size.map(|v| v as i32))
        .bind(&cert.public_key_curve)
        .bind(&cert.ski)
        .bind(&cert.aki)
        .bind(cert.is_ca)
        .bind(cert.path_len_constraint.map(|v| v as i32))
        .bind(json_vec(&cert.key_usage))
        .bind(json_vec(&cert.extended_key_usage))
        .bind(json_vec(&cert.crl_distribution_points))
        .bind(&cert.ocsp_url)
        .bind(cert.self_signed)
        .bind(cert.source_verified)
        .bind(cert.stored_in_directory)
        .bind(cert.deleted)
        .bind(cert.first_ingested_at)
        .bind(cert.source_upload_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::inserted());
        }
        let existing: Uuid =
            sqlx::query_scalar("SELECT id FROM certificate WHERE fingerprint = $1")
                .bind(&cert.fingerprint)
                .fetch_one(&self.pool)
                .await?;
        Ok(InsertOutcome::duplicate(existing))
    }

    async fn certificate_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<CertificateRecord>> {
        let row = sqlx::query("SELECT * FROM certificate WHERE fingerprint = $1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(certificate_from_row).transpose()
    }

    async fn certificates_by_subject(
        &self,
        normalized_dn: &str,
    ) -> Result<Vec<CertificateRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM certificate
             WHERE subject_dn_normalized = $1 AND NOT deleted",
        )
        .bind(normalized_dn)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(certificate_from_row).collect()
    }

    async fn cscas_by_subject(&self, normalized_dn: &str) -> Result<Vec<CertificateRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM certificate
             WHERE subject_dn_normalized = $1 AND cert_type = 'CSCA' AND NOT deleted",
        )
        .bind(normalized_dn)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(certificate_from_row).collect()
    }

    async fn count_certificates_by_type(&self, cert_type: CertType) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM certificate WHERE cert_type = $1 AND NOT deleted",
        )
        .bind(cert_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn count_certificates_by_country(
        &self,
        cert_type: CertType,
    ) -> Result<BTreeMap<String, u64>> {
        let rows = sqlx::query(
            "SELECT country, COUNT(*) AS n FROM certificate
             WHERE cert_type = $1 AND NOT deleted GROUP BY country",
        )
        .bind(cert_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        let mut counts = BTreeMap::new();
        for row in rows {
            counts.insert(
                row.try_get::<String, _>("country")?,
                row.try_get::<i64, _>("n")? as u64,
            );
        }
        Ok(counts)
    }

    async fn paginate_certificates(
        &self,
        filter: &CertificateFilter,
    ) -> Result<Vec<CertificateRecord>> {
        let limit = if filter.limit == 0 {
            i64::MAX
        } else {
            filter.limit as i64
        };
        let rows = sqlx::query(
            "SELECT * FROM certificate
             WHERE NOT deleted
               AND ($1::TEXT IS NULL OR cert_type = $1)
               AND ($2::TEXT IS NULL OR country = $2)
             ORDER BY first_ingested_at, fingerprint
             OFFSET $3 LIMIT $4",
        )
        .bind(filter.cert_type.map(|t| t.as_str()))
        .bind(&filter.country)
        .bind(filter.offset as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(certificate_from_row).collect()
    }

    async fn unpublished_certificates(
        &self,
        cert_type: CertType,
        limit: u32,
    ) -> Result<Vec<CertificateRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM certificate
             WHERE cert_type = $1 AND NOT stored_in_directory AND NOT deleted
             ORDER BY first_ingested_at LIMIT $2",
        )
        .bind(cert_type.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(certificate_from_row).collect()
    }

    async fn mark_certificate_stored(&self, fingerprint: &str, stored: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE certificate SET stored_in_directory = $1 WHERE fingerprint = $2")
                .bind(stored)
                .bind(fingerprint)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(PkdError::Store(format!(
                "no certificate with fingerprint {fingerprint}"
            )));
        }
        Ok(())
    }

    async fn soft_delete_certificate(&self, fingerprint: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE certificate SET deleted = TRUE WHERE fingerprint = $1")
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn certificates_expiring_within(&self, days: i64) -> Result<Vec<CertificateRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM certificate
             WHERE NOT deleted
               AND not_after >= NOW()
               AND not_after <= NOW() + ($1 || ' days')::INTERVAL",
        )
        .bind(days.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(certificate_from_row).collect()
    }
}

#[async_trait]
impl CrlStore for PgStore {
    async fn insert_crl_if_absent(&self, crl: &CrlRecord) -> Result<InsertOutcome> {
        let revoked = serde_json::to_string(&crl.revoked)
            .map_err(|e| PkdError::Store(format!("cannot serialize revoked list: {e}")))?;
        let result = sqlx::query(
            "INSERT INTO crl (
                id, fingerprint, der, issuer_dn, issuer_dn_normalized, country,
                this_update, next_update, crl_number, revoked, stored_in_directory,
                first_ingested_at, source_upload_id
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            ON CONFLICT (fingerprint) DO NOTHING",
        )
        .bind(crl.id)
        .bind(&crl.fingerprint)
        .bind(&crl.der)
        .bind(&crl.issuer_dn)
        .bind(&crl.issuer_dn_normalized)
        .bind(&crl.country)
        .bind(crl.this_update)
        .bind(crl.next_update)
        .bind(&crl.crl_number)
        .bind(revoked)
        .bind(crl.stored_in_directory)
        .bind(crl.first_ingested_at)
        .bind(crl.source_upload_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::inserted());
        }
        let existing: Uuid = sqlx::query_scalar("SELECT id FROM crl WHERE fingerprint = $1")
            .bind(&crl.fingerprint)
            .fetch_one(&self.pool)
            .await?;
        Ok(InsertOutcome::duplicate(existing))
    }

    async fn crl_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CrlRecord>> {
        let row = sqlx::query("SELECT * FROM crl WHERE fingerprint = $1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(crl_from_row).transpose()
    }

    async fn crls_by_issuer(&self, normalized_dn: &str, country: &str) -> Result<Vec<CrlRecord>> {
        let rows =
            sqlx::query("SELECT * FROM crl WHERE issuer_dn_normalized = $1 AND country = $2")
                .bind(normalized_dn)
                .bind(country)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(crl_from_row).collect()
    }

    async fn count_crls(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM crl")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn count_crls_by_country(&self) -> Result<BTreeMap<String, u64>> {
        let rows = sqlx::query("SELECT country, COUNT(*) AS n FROM crl GROUP BY country")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = BTreeMap::new();
        for row in rows {
            counts.insert(
                row.try_get::<String, _>("country")?,
                row.try_get::<i64, _>("n")? as u64,
            );
        }
        Ok(counts)
    }

    async fn unpublished_crls(&self, limit: u32) -> Result<Vec<CrlRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM crl WHERE NOT stored_in_directory
             ORDER BY first_ingested_at LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(crl_from_row).collect()
    }

    async fn mark_crl_stored(&self, fingerprint: &str, stored: bool) -> Result<()> {
        let result = sqlx::query("UPDATE crl SET stored_in_directory = $1 WHERE fingerprint = $2")
            .bind(stored)
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(PkdError::Store(format!(
                "no CRL with fingerprint {fingerprint}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl UploadStore for PgStore {
    async fn insert_upload(&self, upload: &UploadedFile) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO uploaded_file (
                id, original_filename, canonical_filename, content_sha256,
                size_bytes, format, status, csca_count, dsc_count, dsc_nc_count,
                mlsc_count, dvl_signer_count, link_count, crl_count,
                master_list_count, duplicate_count, error_count, collection_number,
                created_at, completed_at, error_message
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,
                      $18,$19,$20,$21)
            ON CONFLICT (content_sha256) DO NOTHING",
        )
        .bind(upload.id)
        .bind(&upload.original_filename)
        .bind(&upload.canonical_filename)
        .bind(&upload.content_sha256)
        .bind(upload.size_bytes as i64)
        .bind(upload.format.as_str())
        .bind(upload.status.as_str())
        .bind(upload.counters.csca as i32)
        .bind(upload.counters.dsc as i32)
        .bind(upload.counters.dsc_nc as i32)
        .bind(upload.counters.mlsc as i32)
        .bind(upload.counters.dvl_signer as i32)
        .bind(upload.counters.link as i32)
        .bind(upload.counters.crl as i32)
        .bind(upload.counters.master_lists as i32)
        .bind(upload.counters.duplicates as i32)
        .bind(upload.counters.errors as i32)
        .bind(&upload.collection_number)
        .bind(upload.created_at)
        .bind(upload.completed_at)
        .bind(&upload.error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PkdError::Conflict(format!(
                "duplicate upload content: {}",
                upload.content_sha256
            )));
        }
        Ok(())
    }

    async fn update_upload(&self, upload: &UploadedFile) -> Result<()> {
        let result = sqlx::query(
            "UPDATE uploaded_file SET
                status = $2, csca_count = $3, dsc_count = $4, dsc_nc_count = $5,
                mlsc_count = $6, dvl_signer_count = $7, link_count = $8,
                crl_count = $9, master_list_count = $10, duplicate_count = $11,
                error_count = $12, collection_number = $13, completed_at = $14,
                error_message = $15, format = $16
             WHERE id = $1",
        )
        .bind(upload.id)
        .bind(upload.status.as_str())
        .bind(upload.counters.csca as i32)
        .bind(upload.counters.dsc as i32)
        .bind(upload.counters.dsc_nc as i32)
        .bind(upload.counters.mlsc as i32)
        .bind(upload.counters.dvl_signer as i32)
        .bind(upload.counters.link as i32)
        .bind(upload.counters.crl as i32)
        .bind(upload.counters.master_lists as i32)
        .bind(upload.counters.duplicates as i32)
        .bind(upload.counters.errors as i32)
        .bind(&upload.collection_number)
        .bind(upload.completed_at)
        .bind(&upload.error_message)
        .bind(upload.format.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(PkdError::Store(format!("no upload with id {}", upload.id)));
        }
        Ok(())
    }

    async fn upload_by_id(&self, id: Uuid) -> Result<Option<UploadedFile>> {
        let row = sqlx::query("SELECT * FROM uploaded_file WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(upload_from_row).transpose()
    }

    async fn upload_by_content_hash(&self, sha256: &str) -> Result<Option<UploadedFile>> {
        let row = sqlx::query("SELECT * FROM uploaded_file WHERE content_sha256 = $1")
            .bind(sha256)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(upload_from_row).transpose()
    }
}

#[async_trait]
impl SyncStatusStore for PgStore {
    async fn insert_sync_status(&self, status: &SyncStatus) -> Result<()> {
        let breakdown = serde_json::to_string(&status.country_breakdown)
            .map_err(|e| PkdError::Store(format!("cannot serialize country breakdown: {e}")))?;
        sqlx::query(
            "INSERT INTO sync_status (
                id, checked_at, csca_db, dsc_db, dsc_nc_db, crl_db, csca_ldap,
                dsc_ldap, dsc_nc_ldap, crl_ldap, csca_discrepancy, dsc_discrepancy,
                dsc_nc_discrepancy, crl_discrepancy, total_discrepancy,
                sync_required, country_breakdown
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)",
        )
        .bind(status.id)
        .bind(status.checked_at)
        .bind(status.csca_db as i64)
        .bind(status.dsc_db as i64)
        .bind(status.dsc_nc_db as i64)
        .bind(status.crl_db as i64)
        .bind(status.csca_ldap as i64)
        .bind(status.dsc_ldap as i64)
        .bind(status.dsc_nc_ldap as i64)
        .bind(status.crl_ldap as i64)
        .bind(status.csca_discrepancy as i64)
        .bind(status.dsc_discrepancy as i64)
        .bind(status.dsc_nc_discrepancy as i64)
        .bind(status.crl_discrepancy as i64)
        .bind(status.total_discrepancy as i64)
        .bind(status.sync_required)
        .bind(breakdown)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_sync_status(&self) -> Result<Option<SyncStatus>> {
        let row = sqlx::query("SELECT * FROM sync_status ORDER BY checked_at DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let breakdown: BTreeMap<String, CountryCounts> =
            serde_json::from_str(&row.try_get::<String, _>("country_breakdown")?)
                .unwrap_or_default();
        Ok(Some(SyncStatus {
            id: row.try_get("id")?,
            checked_at: row.try_get("checked_at")?,
            csca_db: row.try_get::<i64, _>("csca_db")? as u64,
            dsc_db: row.try_get::<i64, _>("dsc_db")? as u64,
            dsc_nc_db: row.try_get::<i64, _>("dsc_nc_db")? as u64,
            crl_db: row.try_get::<i64, _>("crl_db")? as u64,
            csca_ldap: row.try_get::<i64, _>("csca_ldap")? as u64,
            dsc_ldap: row.try_get::<i64, _>("dsc_ldap")? as u64,
            dsc_nc_ldap: row.try_get::<i64, _>("dsc_nc_ldap")? as u64,
            crl_ldap: row.try_get::<i64, _>("crl_ldap")? as u64,
            csca_discrepancy: row.try_get::<i64, _>("csca_discrepancy")? as u64,
            dsc_discrepancy: row.try_get::<i64, _>("dsc_discrepancy")? as u64,
            dsc_nc_discrepancy: row.try_get::<i64, _>("dsc_nc_discrepancy")? as u64,
            crl_discrepancy: row.try_get::<i64, _>("crl_discrepancy")? as u64,
            total_discrepancy: row.try_get::<i64, _>("total_discrepancy")? as u64,
            sync_required: row.try_get("sync_required")?,
            country_breakdown: breakdown,
        }))
    }
}

#[async_trait]
impl PaVerificationStore for PgStore {
    async fn insert_pa_verification(&self, verification: &PaVerification) -> Result<()> {
        sqlx::query(
            "INSERT INTO pa_verification (
                id, issuing_country, document_number, sod_hash, dsc_subject,
                dsc_serial, dsc_issuer, dsc_fingerprint, csca_subject, csca_serial,
                csca_issuer, csca_fingerprint, trust_chain_valid,
                sod_signature_valid, dg_hashes_valid, crl_clean, status, message,
                client_ip, user_agent, requested_at, completed_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,
                      $18,$19,$20,$21,$22)",
        )
        .bind(verification.id)
        .bind(&verification.issuing_country)
        .bind(&verification.document_number)
        .bind(&verification.sod_hash)
        .bind(verification.dsc.as_ref().map(|d| d.subject_dn.clone()))
        .bind(verification.dsc.as_ref().map(|d| d.serial.clone()))
        .bind(verification.dsc.as_ref().map(|d| d.issuer_dn.clone()))
        .bind(verification.dsc.as_ref().map(|d| d.fingerprint.clone()))
        .bind(verification.csca.as_ref().map(|d| d.subject_dn.clone()))
        .bind(verification.csca.as_ref().map(|d| d.serial.clone()))
        .bind(verification.csca.as_ref().map(|d| d.issuer_dn.clone()))
        .bind(verification.csca.as_ref().map(|d| d.fingerprint.clone()))
        .bind(verification.trust_chain_valid)
        .bind(verification.sod_signature_valid)
        .bind(verification.dg_hashes_valid)
        .bind(verification.crl_clean)
        .bind(verification.status.as_str())
        .bind(&verification.message)
        .bind(&verification.client_ip)
        .bind(&verification.user_agent)
        .bind(verification.requested_at)
        .bind(verification.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pa_verification_by_id(&self, id: Uuid) -> Result<Option<PaVerification>> {
        let row = sqlx::query("SELECT * FROM pa_verification WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(PaVerification {
            id: row.try_get("id")?,
            issuing_country: row.try_get("issuing_country")?,
            document_number: row.try_get("document_number")?,
            sod_hash: row.try_get("sod_hash")?,
            dsc: descriptor_from_row(&row, "dsc")?,
            csca: descriptor_from_row(&row, "csca")?,
            trust_chain_valid: row.try_get("trust_chain_valid")?,
            sod_signature_valid: row.try_get("sod_signature_valid")?,
            dg_hashes_valid: row.try_get("dg_hashes_valid")?,
            crl_clean: row.try_get("crl_clean")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            message: row.try_get("message")?,
            client_ip: row.try_get("client_ip")?,
            user_agent: row.try_get("user_agent")?,
            requested_at: row.try_get("requested_at")?,
            completed_at: row.try_get("completed_at")?,
        }))
    }
}

#[async_trait]
impl IcaoVersionStore for PgStore {
    async fn insert_icao_version_if_absent(&self, version: &IcaoVersion) -> Result<InsertOutcome> {
        let result = sqlx::query(
            "INSERT INTO icao_pkd_versions (
                id, collection, filename, version, status, detected_at, notified,
                upload_id
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            ON CONFLICT (collection, version) DO NOTHING",
        )
        .bind(version.id)
        .bind(version.collection.as_str())
        .bind(&version.filename)
        .bind(version.version as i32)
        .bind(version.status.as_str())
        .bind(version.detected_at)
        .bind(version.notified)
        .bind(version.upload_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::inserted());
        }
        let existing: Uuid = sqlx::query_scalar(
            "SELECT id FROM icao_pkd_versions WHERE collection = $1 AND version = $2",
        )
        .bind(version.collection.as_str())
        .bind(version.version as i32)
        .fetch_one(&self.pool)
        .await?;
        Ok(InsertOutcome::duplicate(existing))
    }

    async fn icao_versions(&self, collection: IcaoCollection) -> Result<Vec<IcaoVersion>> {
        let rows = sqlx::query(
            "SELECT * FROM icao_pkd_versions WHERE collection = $1 ORDER BY version",
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await?;
        let mut versions = Vec::with_capacity(rows.len());
        for row in rows {
            versions.push(IcaoVersion {
                id: row.try_get("id")?,
                collection: row.try_get::<String, _>("collection")?.parse()?,
                filename: row.try_get("filename")?,
                version: row.try_get::<i32, _>("version")? as u32,
                status: row.try_get::<String, _>("status")?.parse()?,
                detected_at: row.try_get("detected_at")?,
                notified: row.try_get("notified")?,
                upload_id: row.try_get("upload_id")?,
            });
        }
        Ok(versions)
    }

    async fn update_icao_version_status(
        &self,
        id: Uuid,
        status: IcaoVersionStatus,
        notified: bool,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE icao_pkd_versions SET status = $2, notified = $3 WHERE id = $1")
                .bind(id)
                .bind(status.as_str())
                .bind(notified)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(PkdError::Store(format!("no ICAO version with id {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ReconciliationStore for PgStore {
    async fn insert_reconciliation_summary(&self, summary: &ReconciliationSummary) -> Result<()> {
        sqlx::query(
            "INSERT INTO reconciliation_summary (
                id, started_at, finished_at, additions, deletions, failures,
                status, message
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(summary.id)
        .bind(summary.started_at)
        .bind(summary.finished_at)
        .bind(summary.additions as i32)
        .bind(summary.deletions as i32)
        .bind(summary.failures as i32)
        .bind(&summary.status)
        .bind(&summary.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_reconciliation_failures(
        &self,
        summary_id: Uuid,
        failures: &[ReconciliationFailure],
    ) -> Result<()> {
        for failure in failures {
            sqlx::query(
                "INSERT INTO reconciliation_log (
                    id, summary_id, cert_type, operation, country, subject, error,
                    created_at
                ) VALUES ($1,$2,$3,$4,$5,$6,$7,NOW())",
            )
            .bind(Uuid::new_v4())
            .bind(summary_id)
            .bind(&failure.cert_type)
            .bind(&failure.operation)
            .bind(&failure.country)
            .bind(&failure.subject)
            .bind(&failure.error)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}
