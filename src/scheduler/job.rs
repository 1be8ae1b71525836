use tokio::net::TcpStream;

/// One submitted shell command plus its identity and originating connection.
///
/// Jobs are immutable once created except for their queue membership. The
/// origin connection is carried with the job: whichever worker eventually
/// executes it delivers the output over that connection and closes it.
#[derive(Debug)]
pub struct Job {
    /// Opaque id, `job_<n>`, assigned monotonically per server instance.
    pub id: String,
    /// The shell command text.
    pub command: String,
    /// The client connection that submitted the job, if still attached.
    pub origin: Option<TcpStream>,
}

impl Job {
    pub fn new(id: String, command: String, origin: Option<TcpStream>) -> Self {
        Self {
            id,
            command,
            origin,
        }
    }
}
