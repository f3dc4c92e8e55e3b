//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::dao::models::RoomCode;

/// Validates that a proposed room code is 3-5 uppercase alphanumeric
/// characters.
///
/// # Examples
///
/// ```ignore
/// validate_room_code("AB12")  // Ok
/// validate_room_code("ab12")  // Err - lowercase
/// validate_room_code("AB")    // Err - too short
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if RoomCode::parse(code).is_err() {
        let mut err = ValidationError::new("room_code_format");
        err.message =
            Some("Room code must be 3-5 uppercase alphanumeric characters".into());
        return Err(err);
    }

    Ok(())
}
