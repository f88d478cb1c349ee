//! The capability set the sweep core needs from a voltage source

use async_trait::async_trait;
use crate::error::Error;

/// A programmable source with read-back
///
/// Implementations own their transport session. Each call is one complete round trip with the
/// device; the core never issues a second call before the first has returned.
#[async_trait]
pub trait Instrument: Send
{
    /// Identification string of the device, queried once when a session starts
    async fn identify(&mut self) -> Result<String, Error>;

    /// The output value the device reports right now
    async fn read_value(&mut self) -> Result<f64, Error>;

    /// Command a new output value
    ///
    /// Values outside the device's range fail with `Error::OutOfRange` without anything being sent.
    async fn write_value(&mut self, value: f64) -> Result<(), Error>;

    /// Switch the output on or off
    ///
    /// Must be safe to call repeatedly with the same state.
    async fn set_output_enabled(&mut self, enabled: bool) -> Result<(), Error>;
}

#[async_trait]
impl <I> Instrument for &mut I
    where I: Instrument + ?Sized
{
    async fn identify(&mut self) -> Result<String, Error>
    {
        (**self).identify().await
    }

    async fn read_value(&mut self) -> Result<f64, Error>
    {
        (**self).read_value().await
    }

    async fn write_value(&mut self, value: f64) -> Result<(), Error>
    {
        (**self).write_value(value).await
    }

    async fn set_output_enabled(&mut self, enabled: bool) -> Result<(), Error>
    {
        (**self).set_output_enabled(enabled).await
    }
}

#[async_trait]
impl <I> Instrument for Box<I>
    where I: Instrument + ?Sized
{
    async fn identify(&mut self) -> Result<String, Error>
    {
        (**self).identify().await
    }

    async fn read_value(&mut self) -> Result<f64, Error>
    {
        (**self).read_value().await
    }

    async fn write_value(&mut self, value: f64) -> Result<(), Error>
    {
        (**self).write_value(value).await
    }

    async fn set_output_enabled(&mut self, enabled: bool) -> Result<(), Error>
    {
        (**self).set_output_enabled(enabled).await
    }
}

#[cfg(test)]
pub(crate) mod fake
{
    //! In-memory source used by the unit tests

    use async_trait::async_trait;
    use std::io;
    use super::Instrument;
    use crate::error::{ Error, RangeError };

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call
    {
        Read(f64),
        Write(f64),
        Output(bool),
    }

    /// A source whose read-back follows the last write, optionally lagging behind
    pub struct FakeSource
    {
        pub commanded: f64,
        pub actual: f64,
        pub output_enabled: bool,
        pub limit: f64,
        /// Fraction of the remaining distance the read-back closes on every read (1.0 = instant)
        pub follow: f64,
        pub calls: Vec<Call>,
        /// Fail the Nth write (counted from 1)
        pub fail_write_at: Option<usize>,
        /// Fail the Nth read (counted from 1)
        pub fail_read_at: Option<usize>,
        pub fail_output_off: bool,
        writes: usize,
        reads: usize,
    }

    impl FakeSource
    {
        pub fn at(value: f64) -> Self
        {
            Self {
                commanded: value,
                actual: value,
                output_enabled: false,
                limit: 1000.0,
                follow: 1.0,
                calls: Vec::new(),
                fail_write_at: None,
                fail_read_at: None,
                fail_output_off: false,
                writes: 0,
                reads: 0,
            }
        }

        pub fn writes(&self) -> Vec<f64>
        {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Write(value) => Some(*value),
                    _ => None,
                })
                .collect()
        }

        pub fn output_calls(&self) -> Vec<bool>
        {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Output(state) => Some(*state),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl Instrument for FakeSource
    {
        async fn identify(&mut self) -> Result<String, Error>
        {
            Ok("FAKE,SOURCE,0,0".to_owned())
        }

        async fn read_value(&mut self) -> Result<f64, Error>
        {
            self.reads += 1;
            if self.fail_read_at == Some(self.reads) {
                return Err(io::Error::from(io::ErrorKind::TimedOut).into());
            }

            if self.follow >= 1.0 {
                self.actual = self.commanded;
            }
            else {
                self.actual += (self.commanded - self.actual) * self.follow;
            }
            self.calls.push(Call::Read(self.actual));
            Ok(self.actual)
        }

        async fn write_value(&mut self, value: f64) -> Result<(), Error>
        {
            if value.abs() > self.limit {
                return Err(RangeError { requested: value, min: -self.limit, max: self.limit }.into());
            }

            self.writes += 1;
            if self.fail_write_at == Some(self.writes) {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
            }

            self.commanded = value;
            self.calls.push(Call::Write(value));
            Ok(())
        }

        async fn set_output_enabled(&mut self, enabled: bool) -> Result<(), Error>
        {
            self.calls.push(Call::Output(enabled));

            if !enabled && self.fail_output_off {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
            }

            self.output_enabled = enabled;
            Ok(())
        }
    }

    #[tokio::test]
    async fn disabling_twice_is_harmless()
    {
        let mut source = FakeSource::at(0.0);

        source.set_output_enabled(true).await.unwrap();
        source.set_output_enabled(false).await.unwrap();
        source.set_output_enabled(false).await.unwrap();

        assert!(!source.output_enabled);
        assert_eq!(source.output_calls(), vec![true, false, false]);
    }
}
