//! Validation and type conversion of raw review blocks

use crate::document::{NormalizedDocument, RawRecord, document_id, fields};
use crate::error::ValidationError;
use chrono::DateTime;

/// Highest review score accepted
const MAX_SCORE: f64 = 5.0;

/// Convert a raw block into an indexable document.
///
/// Rejects blocks without product or user ids, scores outside [0, 5],
/// negative or unparsable times, and helpfulness ratios above 1. The ratio
/// is only computed when the vote denominator is positive. Text fields pass
/// through as parsed.
pub fn normalize(record: &RawRecord) -> Result<NormalizedDocument, ValidationError> {
    let product_id = required(record, fields::PRODUCT_ID)?;
    let user_id = required(record, fields::USER_ID)?;

    let score_raw = required(record, fields::SCORE)?;
    let score: f64 = score_raw.parse().map_err(|_| ValidationError::Invalid {
        field: fields::SCORE,
        value: score_raw.to_string(),
    })?;
    if !(0.0..=MAX_SCORE).contains(&score) {
        return Err(ValidationError::OutOfRange {
            field: fields::SCORE,
            value: score_raw.to_string(),
        });
    }

    let time_raw = required(record, fields::TIME)?;
    let seconds: u64 = time_raw.parse().map_err(|_| ValidationError::Invalid {
        field: fields::TIME,
        value: time_raw.to_string(),
    })?;
    let out_of_range = || ValidationError::OutOfRange {
        field: fields::TIME,
        value: time_raw.to_string(),
    };
    let timestamp = i64::try_from(seconds).map_err(|_| out_of_range())?;
    let time_iso = DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(out_of_range)?
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string();

    let helpfulness_raw = optional(record, fields::HELPFULNESS);
    let helpfulness_ratio = match helpfulness_raw {
        Some(raw) => helpfulness(raw)?,
        None => None,
    };

    Ok(NormalizedDocument {
        document_id: document_id(product_id, user_id, timestamp),
        product_id: product_id.to_string(),
        user_id: user_id.to_string(),
        score,
        helpfulness_ratio,
        helpfulness_raw: helpfulness_raw.map(str::to_string),
        timestamp,
        time_iso,
        summary_text: record.get(fields::SUMMARY).unwrap_or_default().to_string(),
        review_text: record.get(fields::TEXT).unwrap_or_default().to_string(),
        title: optional(record, fields::TITLE).map(str::to_string),
        price: optional(record, fields::PRICE)
            .and_then(|p| p.parse::<f64>().ok())
            .filter(|p| p.is_finite()),
        profile_name: optional(record, fields::PROFILE_NAME).map(str::to_string),
    })
}

/// Parse `num/denom` into a ratio.
///
/// `Ok(None)` when the denominator is zero or the value is not a pair of
/// integers; `Err` when the ratio would exceed 1.
fn helpfulness(raw: &str) -> Result<Option<f64>, ValidationError> {
    let Some((num, denom)) = raw.split_once('/') else {
        return Ok(None);
    };
    let (Ok(num), Ok(denom)) = (num.trim().parse::<u64>(), denom.trim().parse::<u64>()) else {
        return Ok(None);
    };
    if denom == 0 {
        return Ok(None);
    }
    if num > denom {
        return Err(ValidationError::OutOfRange {
            field: fields::HELPFULNESS,
            value: raw.to_string(),
        });
    }
    Ok(Some(num as f64 / denom as f64))
}

fn required<'a>(record: &'a RawRecord, field: &'static str) -> Result<&'a str, ValidationError> {
    optional(record, field).ok_or(ValidationError::Missing(field))
}

fn optional<'a>(record: &'a RawRecord, field: &str) -> Option<&'a str> {
    record.get(field).filter(|v| !v.is_empty())
}
