//! Small reusable validators used by [`crate::config::PipelineConfig::validate`].
use std::collections::HashSet;
use std::hash::Hash;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

/// Validates if a given path is usable as a configured file or directory.
///
/// # Arguments
///
/// * `path` - The path to validate.
///
/// # Returns
///
/// * `Ok(())` if the path is valid.
/// * `Err(&'static str)` if the path is empty or contains null bytes.
pub fn is_valid_path(path: &Path) -> Result<(), &'static str> {
    let text = path.to_string_lossy();
    if text.is_empty() {
        return Err("File path cannot be empty");
    }
    if text.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    Ok(())
}

/// Validates if a given value is within a specified numeric range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates if a given string is not empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}

/// Sliding windows must be odd so they have a centre sample.
pub fn is_odd_window(window: usize) -> Result<(), &'static str> {
    if window % 2 == 1 {
        Ok(())
    } else {
        Err("Window length must be odd and greater than 0")
    }
}

pub fn is_positive_duration(value: Duration) -> Result<(), &'static str> {
    if value.is_zero() {
        Err("Duration must be greater than 0")
    } else {
        Ok(())
    }
}

/// Validates that a list is non-empty and holds no repeated entries.
pub fn are_unique<T: Eq + Hash>(values: &[T]) -> Result<(), &'static str> {
    if values.is_empty() {
        return Err("List cannot be empty");
    }
    let mut seen = HashSet::new();
    if values.iter().all(|v| seen.insert(v)) {
        Ok(())
    } else {
        Err("List contains duplicate entries")
    }
}

/// Validates a `chrono` format string by rendering a fixed timestamp with it.
pub fn is_valid_time_format(format: &str) -> Result<(), &'static str> {
    use chrono::format::{Item, StrftimeItems};
    if format.is_empty() {
        return Err("Time format cannot be empty");
    }
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err("Time format contains an invalid specifier");
    }
    Ok(())
}
