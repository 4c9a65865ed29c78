//! Server diagnostic (ISC) error codes used by this client.

/// Invalid database handle.
pub const ISC_BAD_DB_HANDLE: i32 = 335_544_324;
/// Invalid blob handle.
pub const ISC_BAD_SEGSTR_HANDLE: i32 = 335_544_328;
/// Invalid blob id.
pub const ISC_BAD_SEGSTR_ID: i32 = 335_544_329;
/// Invalid transaction handle.
pub const ISC_BAD_TRANS_HANDLE: i32 = 335_544_332;
/// Blob was not closed.
pub const ISC_NO_SEGSTR_CLOSE: i32 = 335_544_355;
/// Detach with open transactions.
pub const ISC_OPEN_TRANS: i32 = 335_544_357;
/// Segment buffer shorter than the segment.
pub const ISC_SEGMENT: i32 = 335_544_366;
/// Read past the last segment.
pub const ISC_SEGSTR_EOF: i32 = 335_544_367;
/// Invalid blob operation.
pub const ISC_SEGSTR_NO_OP: i32 = 335_544_368;
/// Read of a blob opened for writing.
pub const ISC_SEGSTR_NO_READ: i32 = 335_544_369;
/// Blob operation outside a transaction.
pub const ISC_SEGSTR_NO_TRANS: i32 = 335_544_370;
/// Write to a blob opened for reading.
pub const ISC_SEGSTR_NO_WRITE: i32 = 335_544_371;
/// Blob referenced in an unavailable database.
pub const ISC_SEGSTR_WRONG_DB: i32 = 335_544_372;
/// Feature is not supported.
pub const ISC_WISH_LIST: i32 = 335_544_378;
/// Invalid blob type for the operation (seek on a segmented blob).
pub const ISC_BAD_SEGSTR_TYPE: i32 = 335_544_465;
/// Invalid transaction state transition.
pub const ISC_TRA_STATE: i32 = 335_544_468;
/// Login rejected.
pub const ISC_LOGIN: i32 = 335_544_472;
/// Unknown data type.
pub const ISC_DSQL_DATATYPE_ERR: i32 = 335_544_573;
/// Incorrect values in the parameter description.
pub const ISC_DSQL_SQLDA_VALUE_ERR: i32 = 335_544_713;
/// Network request could not be completed.
pub const ISC_NETWORK_ERROR: i32 = 335_544_721;
/// Failed to establish a connection.
pub const ISC_NET_CONNECT_ERR: i32 = 335_544_722;
/// Failed to establish the auxiliary event connection.
pub const ISC_NET_EVENT_CONNECT_ERR: i32 = 335_544_724;
/// Error reading from the connection.
pub const ISC_NET_READ_ERR: i32 = 335_544_726;
/// Error writing to the connection.
pub const ISC_NET_WRITE_ERR: i32 = 335_544_727;
/// Operation was cancelled.
pub const ISC_CANCELLED: i32 = 335_544_794;

/// Message template for a known code; `@n` marks the nth parameter.
#[must_use]
pub fn message_template(code: i32) -> Option<&'static str> {
    let template = match code {
        ISC_BAD_DB_HANDLE => "invalid database handle (no active connection)",
        ISC_BAD_SEGSTR_HANDLE => "invalid BLOB handle",
        ISC_BAD_SEGSTR_ID => "invalid BLOB ID",
        ISC_BAD_TRANS_HANDLE => "invalid transaction handle (expecting explicit transaction start)",
        ISC_NO_SEGSTR_CLOSE => "BLOB was not closed",
        ISC_OPEN_TRANS => "cannot disconnect database with open transactions (@1 active)",
        ISC_SEGMENT => "segment buffer length shorter than expected",
        ISC_SEGSTR_EOF => "attempted retrieval of more segments than exist",
        ISC_SEGSTR_NO_OP => "attempted invalid operation on a BLOB",
        ISC_SEGSTR_NO_READ => "attempted read of a new, open BLOB",
        ISC_SEGSTR_NO_TRANS => "attempted action on BLOB outside transaction",
        ISC_SEGSTR_NO_WRITE => "attempted write to read-only BLOB",
        ISC_SEGSTR_WRONG_DB => "attempted reference to BLOB in unavailable database",
        ISC_WISH_LIST => "feature is not supported",
        ISC_BAD_SEGSTR_TYPE => "invalid BLOB type for operation",
        ISC_TRA_STATE => "transaction @1 is @2",
        ISC_LOGIN => "Your user name and password are not defined",
        ISC_DSQL_DATATYPE_ERR => "Data type unknown",
        ISC_DSQL_SQLDA_VALUE_ERR => "Incorrect values within SQLDA structure",
        ISC_NETWORK_ERROR => "Unable to complete network request to host \"@1\"",
        ISC_NET_CONNECT_ERR => "Failed to establish a connection",
        ISC_NET_EVENT_CONNECT_ERR => "Failed to establish a secondary connection for event processing",
        ISC_NET_READ_ERR => "Error reading data from the connection",
        ISC_NET_WRITE_ERR => "Error writing data to the connection",
        ISC_CANCELLED => "operation was cancelled",
        _ => return None,
    };
    Some(template)
}

/// Render the message for `code`, substituting `@1`, `@2`, ... with `params`.
///
/// Unknown codes render as the code followed by any parameters.
#[must_use]
pub fn format_message(code: i32, params: &[String]) -> String {
    let Some(template) = message_template(code) else {
        let mut message = format!("error code {code}");
        for param in params {
            message.push_str("; ");
            message.push_str(param);
        }
        return message;
    };

    let mut message = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '@' {
            if let Some(digit) = chars.peek().and_then(|d| d.to_digit(10)) {
                chars.next();
                let index = digit as usize;
                match index.checked_sub(1).and_then(|i| params.get(i)) {
                    Some(param) => message.push_str(param),
                    None => {
                        message.push('@');
                        message.push_str(&index.to_string());
                    }
                }
                continue;
            }
        }
        message.push(c);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_known_message() {
        let msg = format_message(ISC_OPEN_TRANS, &["2".to_string()]);
        assert_eq!(msg, "cannot disconnect database with open transactions (2 active)");
    }

    #[test]
    fn test_format_missing_parameter() {
        let msg = format_message(ISC_TRA_STATE, &["7".to_string()]);
        assert_eq!(msg, "transaction 7 is @2");
    }

    #[test]
    fn test_format_unknown_code() {
        let msg = format_message(1, &["x".to_string()]);
        assert_eq!(msg, "error code 1; x");
    }
}
