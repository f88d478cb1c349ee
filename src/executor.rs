//! Transport session and command execution

use std::{ io, time::Duration };
use tokio::io::{ AsyncWriteExt, AsyncReadExt };
use crate::cmd::ScpiCmd;

/// A line-oriented session with one instrument
///
/// Commands are written terminated with the line ending. Only queries are answered by the device,
/// with a single line terminated by `LF`. There is never more than one request outstanding, which
/// is what half-duplex GPIB and RS232 links require.
///
/// A reply that times out may still arrive later. The session then counts as out of step: before
/// the next query, everything the device sends until it has been quiet for [`RESYNC_QUIET`] is
/// discarded, so a late reply is never taken as the answer to a newer query.
pub struct ScpiExecutor<T>
{
    line_ending: &'static str,
    io_handle: T,
    read_buf: Vec<u8>,
    reply_timeout: Option<Duration>,
    out_of_step: bool,
}

/// How long the device must stay silent before a session is considered back in step
pub const RESYNC_QUIET: Duration = Duration::from_millis(100);

impl <T> ScpiExecutor<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    pub fn with(io_handle: T) -> Self
    {
        Self {
            line_ending: "\n",
            io_handle: io_handle,
            read_buf: Vec::with_capacity(128),
            reply_timeout: None,
            out_of_step: false,
        }
    }

    /// Use a different command terminator, e.g. `"\r\n"` for some serial bridges
    pub fn line_ending(mut self, line_ending: &'static str) -> Self
    {
        self.line_ending = line_ending;
        self
    }

    /// Fail queries whose reply takes longer than `timeout` with `io::ErrorKind::TimedOut`
    pub fn reply_timeout(mut self, timeout: Duration) -> Self
    {
        self.reply_timeout = Some(timeout);
        self
    }

    /// Give the I/O handle back, discarding anything still buffered
    pub fn into_inner(self) -> T
    {
        self.io_handle
    }

    /// Drops the first `n` bytes from the read buffer
    ///
    /// Drops all bytes if `n >= self.read_buf.len()`
    fn drop_first(&mut self, n: usize)
    {
        if n >= self.read_buf.len() {
            self.read_buf.clear();
        }
        else {
            self.read_buf.drain(..n);
        }
    }

    /// Returns the index of the first linefeed in the read buffer at or after `start_hint`
    fn find_line_ending(&self, start_hint: usize) -> Option<usize>
    {
        self.read_buf
            .iter()
            .skip(start_hint)
            .position(|byte| *byte == 0x0A)
            .map(|offset| offset + start_hint)
    }

    /// Reads a line (series of bytes terminated by `LF` / 0x0A) into the read buffer and returns
    /// how many bytes are in the line, including the terminator
    async fn read_line(&mut self) -> Result<usize, io::Error>
    {
        // try to find the ending in already-buffered data first
        let mut end_index = self.find_line_ending(0);

        while end_index.is_none() {
            let mut temp_buf = [0u8; 64];
            let prior_end = self.read_buf.len();
            let bytes_read = self.io_handle.read(&mut temp_buf[..]).await?;

            if bytes_read == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "device closed the connection mid-reply"));
            }

            self.read_buf.extend_from_slice(&temp_buf[..bytes_read]);
            end_index = self.find_line_ending(prior_end);
        }

        Ok(end_index.map(|index| index + 1).unwrap_or(0))
    }

    async fn read_reply(&mut self) -> Result<String, io::Error>
    {
        let response_len = match self.reply_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.read_line()).await {
                Ok(read) => read?,
                Err(_) => {
                    self.out_of_step = true;
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "device did not reply in time"));
                },
            },
            None => self.read_line().await?,
        };

        let response = String::from_utf8_lossy(&self.read_buf[..response_len]).trim().to_owned();
        self.drop_first(response_len);

        Ok(response)
    }

    /// Throws away partial and late replies until the device has been quiet for a while
    async fn resync(&mut self) -> Result<(), io::Error>
    {
        log::warn!(target: "arcs_probe::executor", "Discarding late replies after a reply timeout");
        self.read_buf.clear();

        loop {
            let mut temp_buf = [0u8; 64];

            match tokio::time::timeout(RESYNC_QUIET, self.io_handle.read(&mut temp_buf[..])).await {
                Err(_) => break,
                Ok(Ok(0)) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "device closed the connection"));
                },
                Ok(Ok(bytes_read)) => {
                    log::trace!(
                        target: "arcs_probe::executor",
                        "<- (discarded) {}",
                        String::from_utf8_lossy(&temp_buf[..bytes_read]).trim(),
                    );
                },
                Ok(Err(io_err)) => return Err(io_err),
            }
        }

        self.out_of_step = false;
        Ok(())
    }

    async fn send(&mut self, cmd: &ScpiCmd) -> Result<(), io::Error>
    {
        let serialized = format!("{}{}", cmd, self.line_ending);
        log::trace!(target: "arcs_probe::executor", "-> {}", cmd);
        self.io_handle.write_all(serialized.as_bytes()).await?;
        self.io_handle.flush().await
    }

    /// Sends a command which produces no reply
    ///
    /// Queries are refused with `io::ErrorKind::InvalidInput`; their reply would be left unread.
    pub async fn exec(&mut self, cmd: ScpiCmd) -> Result<(), io::Error>
    {
        if cmd.is_query() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("{} expects a reply, use query", cmd)));
        }

        self.send(&cmd).await
    }

    pub async fn exec_all(&mut self, cmds: &[ScpiCmd]) -> Result<(), io::Error>
    {
        for cmd in cmds.iter() {
            self.exec(cmd.clone()).await?;
        }

        Ok(())
    }

    /// Sends a query and returns the trimmed reply line
    ///
    /// Commands without a reply are refused with `io::ErrorKind::InvalidInput`.
    pub async fn query(&mut self, cmd: ScpiCmd) -> Result<String, io::Error>
    {
        if !cmd.is_query() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("{} has no reply, use exec", cmd)));
        }

        if self.out_of_step {
            self.resync().await?;
        }

        self.send(&cmd).await?;
        let reply = self.read_reply().await?;
        log::trace!(target: "arcs_probe::executor", "<- {}", reply);

        Ok(reply)
    }
}

#[cfg(test)]
mod tests
{
    use super::ScpiExecutor;
    use crate::cmd::ScpiCmd;
    use std::{ io, time::Duration };
    use tokio::io::{ AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader };

    #[tokio::test]
    async fn query_returns_trimmed_line()
    {
        let (client, mut device) = tokio::io::duplex(256);
        let mut executor = ScpiExecutor::with(client);

        let device_task = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = device.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*IDN?\n");
            // reply arrives in two chunks
            device.write_all(b"KEITHLEY INSTRUMENTS,MODEL 6517B").await.unwrap();
            device.write_all(b",1234,A13\r\n").await.unwrap();
            device
        });

        let reply = executor.query(ScpiCmd::Identify).await.unwrap();
        assert_eq!(&reply, "KEITHLEY INSTRUMENTS,MODEL 6517B,1234,A13");
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn buffered_replies_are_consumed_in_order()
    {
        let (client, mut device) = tokio::io::duplex(256);
        let mut executor = ScpiExecutor::with(client);

        device.write_all(b"+1.0E+01\n+2.0E+01\n").await.unwrap();

        assert_eq!(&executor.query(ScpiCmd::GetSourceVoltage).await.unwrap(), "+1.0E+01");
        assert_eq!(&executor.query(ScpiCmd::GetSourceVoltage).await.unwrap(), "+2.0E+01");
    }

    #[tokio::test]
    async fn closed_link_is_an_error()
    {
        let (client, device) = tokio::io::duplex(256);
        let mut executor = ScpiExecutor::with(client);
        drop(device);

        assert!(executor.query(ScpiCmd::Read).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out()
    {
        let (client, _device) = tokio::io::duplex(256);
        let mut executor = ScpiExecutor::with(client).reply_timeout(Duration::from_secs(5));

        let err = executor.query(ScpiCmd::Read).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_is_not_taken_for_the_next_one()
    {
        let (client, device) = tokio::io::duplex(1024);
        let mut executor = ScpiExecutor::with(client).reply_timeout(Duration::from_secs(5));
        let (device_read, mut device_write) = tokio::io::split(device);
        let mut lines = BufReader::new(device_read).lines();

        let err = executor.query(ScpiCmd::Read).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "READ?");

        // the reading shows up after the caller gave up on it
        device_write.write_all(b"-1.0E-09NADC,-50Vsrc\n").await.unwrap();

        let device_task = tokio::spawn(async move {
            let line = lines.next_line().await.unwrap().unwrap();
            assert_eq!(&line, ":SOURCE:VOLTAGE?");
            device_write.write_all(b"+0.000000E+00\n").await.unwrap();
            (lines, device_write)
        });

        assert_eq!(&executor.query(ScpiCmd::GetSourceVoltage).await.unwrap(), "+0.000000E+00");
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn replies_are_matched_to_queries_only()
    {
        let (client, _device) = tokio::io::duplex(256);
        let mut executor = ScpiExecutor::with(client);

        let err = executor.exec(ScpiCmd::Identify).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err = executor.query(ScpiCmd::OutputState(false)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
