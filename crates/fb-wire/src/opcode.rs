//! Wire operation codes.

use crate::error::ProtocolError;

/// Operation code carried as the first integer of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
#[non_exhaustive]
pub enum Operation {
    /// Connect and negotiate protocol.
    Connect = 1,
    /// Close the connection.
    Exit = 2,
    /// Protocol accepted.
    Accept = 3,
    /// Protocol rejected.
    Reject = 4,
    /// Disconnect the port.
    Disconnect = 6,
    /// Generic response.
    Response = 9,
    /// Attach to a database.
    Attach = 19,
    /// Create a database.
    Create = 20,
    /// Detach from a database.
    Detach = 21,
    /// Start a transaction.
    Transaction = 29,
    /// Commit a transaction.
    Commit = 30,
    /// Roll back a transaction.
    Rollback = 31,
    /// Prepare a transaction for two-phase commit.
    Prepare = 32,
    /// Reconnect to a limbo transaction.
    Reconnect = 33,
    /// Create a blob.
    CreateBlob = 34,
    /// Open a blob.
    OpenBlob = 35,
    /// Read blob segments.
    GetSegment = 36,
    /// Write a blob segment.
    PutSegment = 37,
    /// Cancel a blob.
    CancelBlob = 38,
    /// Close a blob.
    CloseBlob = 39,
    /// Database information request.
    InfoDatabase = 40,
    /// Transaction information request.
    InfoTransaction = 42,
    /// Blob information request.
    InfoBlob = 43,
    /// Queue an event.
    QueEvents = 48,
    /// Cancel a queued event.
    CancelEvents = 49,
    /// Commit and keep the transaction context.
    CommitRetaining = 50,
    /// Prepare a transaction with a message.
    Prepare2 = 51,
    /// Event notification on the auxiliary channel.
    Event = 52,
    /// Request an auxiliary connection.
    ConnectRequest = 53,
    /// Open a blob with a parameter buffer.
    OpenBlob2 = 56,
    /// Create a blob with a parameter buffer.
    CreateBlob2 = 57,
    /// Seek in a stream blob.
    SeekBlob = 61,
    /// Execute a statement without preparing it.
    ExecImmediate = 64,
    /// Keep-alive; carries no payload.
    Dummy = 71,
    /// Drop the attached database.
    DropDatabase = 81,
    /// Attach to the service manager.
    ServiceAttach = 82,
    /// Detach from the service manager.
    ServiceDetach = 83,
    /// Service information request.
    ServiceInfo = 84,
    /// Start a service action.
    ServiceStart = 85,
    /// Roll back and keep the transaction context.
    RollbackRetaining = 86,
    /// Cancel the running operation.
    Cancel = 91,
    /// Accept with authentication data.
    AcceptData = 94,
    /// Conditional accept, authentication continues.
    CondAccept = 98,
}

impl Operation {
    /// Map a raw operation code to a known operation.
    pub fn from_i32(value: i32) -> Result<Self, ProtocolError> {
        let op = match value {
            1 => Self::Connect,
            2 => Self::Exit,
            3 => Self::Accept,
            4 => Self::Reject,
            6 => Self::Disconnect,
            9 => Self::Response,
            19 => Self::Attach,
            20 => Self::Create,
            21 => Self::Detach,
            29 => Self::Transaction,
            30 => Self::Commit,
            31 => Self::Rollback,
            32 => Self::Prepare,
            33 => Self::Reconnect,
            34 => Self::CreateBlob,
            35 => Self::OpenBlob,
            36 => Self::GetSegment,
            37 => Self::PutSegment,
            38 => Self::CancelBlob,
            39 => Self::CloseBlob,
            40 => Self::InfoDatabase,
            42 => Self::InfoTransaction,
            43 => Self::InfoBlob,
            48 => Self::QueEvents,
            49 => Self::CancelEvents,
            50 => Self::CommitRetaining,
            51 => Self::Prepare2,
            52 => Self::Event,
            53 => Self::ConnectRequest,
            56 => Self::OpenBlob2,
            57 => Self::CreateBlob2,
            61 => Self::SeekBlob,
            64 => Self::ExecImmediate,
            71 => Self::Dummy,
            81 => Self::DropDatabase,
            82 => Self::ServiceAttach,
            83 => Self::ServiceDetach,
            84 => Self::ServiceInfo,
            85 => Self::ServiceStart,
            86 => Self::RollbackRetaining,
            91 => Self::Cancel,
            94 => Self::AcceptData,
            98 => Self::CondAccept,
            other => return Err(ProtocolError::UnknownOperation(other)),
        };
        Ok(op)
    }

    /// The raw operation code.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// Request type for `op_connect_request`: asynchronous event channel.
pub const P_REQ_ASYNC: i32 = 1;

/// Kinds sent with `op_cancel`.
pub mod cancel_kind {
    /// Disable cancellation for the attachment.
    pub const DISABLE: i32 = 1;
    /// Re-enable cancellation.
    pub const ENABLE: i32 = 2;
    /// Cancel the running operation.
    pub const RAISE: i32 = 3;
    /// Abort the connection.
    pub const ABORT: i32 = 4;
}
