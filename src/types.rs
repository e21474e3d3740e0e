/// Error codes carried in JSON-RPC error objects.
///
/// The four-digit negative codes are the standard JSON-RPC 2.0 codes; the
/// small negative codes are internal to this transport and surface when a
/// held request can no longer be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The connection holding the request was closed
    ConnectionClosed = -1,
    /// The request timed out
    RequestTimeout = -2,

    // Standard JSON-RPC error codes
    /// Invalid JSON was received by the server
    ParseError = -32700,
    /// The JSON sent is not a valid Request object
    InvalidRequest = -32600,
    /// The method does not exist / is not available
    MethodNotFound = -32601,
    /// Invalid method parameter(s)
    InvalidParams = -32602,
    /// Internal JSON-RPC error
    InternalError = -32603,
}
