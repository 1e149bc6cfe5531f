use std::{
    fs::File,
    io::{self, Write},
    os::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
    sync::Arc,
};

use libc::{F_GETFL, F_SETFL, O_CLOEXEC, O_NONBLOCK, fcntl, pipe2};

pub const CONNECT_BYTE: u8 = b'c';
pub const TERMINATE_BYTE: u8 = b'b';

/// One byte on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Open one more connection.
    Connect,
    /// Stop the worker that reads this byte.
    Terminate,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(byte: u8) -> Self {
        match byte {
            CONNECT_BYTE => Self::Connect,
            TERMINATE_BYTE => Self::Terminate,
            other => Self::Unknown(other),
        }
    }
}

impl Command {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Connect => CONNECT_BYTE,
            Self::Terminate => TERMINATE_BYTE,
            Self::Unknown(byte) => byte,
        }
    }
}

/// Write end of the control channel.
///
/// Every byte is delivered to exactly one worker, whichever reads first.
#[derive(Debug)]
pub struct CommandChannel {
    inner: File,
}

impl CommandChannel {
    pub fn send(&self, command: Command) -> io::Result<()> {
        self.send_raw(command.as_byte())
    }

    pub fn send_raw(&self, byte: u8) -> io::Result<()> {
        (&self.inner).write_all(&[byte])
    }

    pub fn open_connection(&self) -> io::Result<()> {
        self.send(Command::Connect)
    }

    /// Queues `count` connect requests in a single write.
    pub fn open_connections(&self, count: usize) -> io::Result<()> {
        let batch = vec![CONNECT_BYTE; count];
        (&self.inner).write_all(&batch)
    }

    /// Stops whichever worker picks the byte up.
    pub fn terminate_one(&self) -> io::Result<()> {
        self.send(Command::Terminate)
    }

    pub(crate) fn terminate_many(&self, workers: usize) -> io::Result<()> {
        let batch = vec![TERMINATE_BYTE; workers];
        (&self.inner).write_all(&batch)
    }
}

impl AsFd for CommandChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

/// Creates the control pipe.
///
/// The read end is non-blocking and shared by all workers; the write end
/// stays blocking so callers never lose a command to a full pipe.
pub(crate) fn control_pipe() -> io::Result<(Arc<File>, CommandChannel)> {
    let (read_fd, write_fd) = make_pipe()?;
    let reader = unsafe { OwnedFd::from_raw_fd(read_fd) };
    let writer = unsafe { OwnedFd::from_raw_fd(write_fd) };

    let flags = unsafe { fcntl(write_fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { fcntl(write_fd, F_SETFL, flags & !O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok((
        Arc::new(File::from(reader)),
        CommandChannel {
            inner: File::from(writer),
        },
    ))
}

fn make_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0; 2];
    let rc = unsafe { pipe2(fds.as_mut_ptr(), O_NONBLOCK | O_CLOEXEC) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

#[cfg(test)]
mod tests {
    use std::io::{ErrorKind, Read};

    use super::{Command, control_pipe};

    #[test]
    fn command_bytes() {
        assert_eq!(Command::from(b'c'), Command::Connect);
        assert_eq!(Command::from(b'b'), Command::Terminate);
        assert_eq!(Command::from(b'x'), Command::Unknown(b'x'));
        assert_eq!(Command::Connect.as_byte(), b'c');
        assert_eq!(Command::Terminate.as_byte(), b'b');
    }

    #[test]
    fn empty_reader_would_block() {
        let (reader, _writer) = control_pipe().unwrap();
        let mut byte = [0u8; 1];
        let err = (&*reader).read(&mut byte).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn bytes_arrive_in_order_once() {
        let (reader, writer) = control_pipe().unwrap();
        writer.open_connections(2).unwrap();
        writer.terminate_one().unwrap();
        writer.send_raw(b'?').unwrap();

        let second = reader.clone();
        let mut byte = [0u8; 1];
        let mut seen = Vec::new();
        for source in [&reader, &second, &reader, &second] {
            assert_eq!((&**source).read(&mut byte).unwrap(), 1);
            seen.push(Command::from(byte[0]));
        }
        assert_eq!(
            seen,
            vec![
                Command::Connect,
                Command::Connect,
                Command::Terminate,
                Command::Unknown(b'?'),
            ]
        );
        assert_eq!(
            (&*reader).read(&mut byte).unwrap_err().kind(),
            ErrorKind::WouldBlock
        );
    }

    #[test]
    fn dropped_writer_reads_eof() {
        let (reader, writer) = control_pipe().unwrap();
        drop(writer);
        let mut byte = [0u8; 1];
        assert_eq!((&*reader).read(&mut byte).unwrap(), 0);
    }
}
