// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io,
    time::{Duration, Instant},
};

use modbus_link::Channel;

/// What the next call of [`Channel::recv`] yields.
#[derive(Debug)]
pub enum Step {
    Data(Vec<u8>),
    /// Sleep for the given time, then deliver the bytes.
    Delayed(Duration, Vec<u8>),
    Timeout,
    Closed,
    Fail(io::ErrorKind),
}

/// A channel replaying a script of receive steps and recording all writes.
///
/// Once the script is exhausted every read times out.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    steps: VecDeque<Step>,
    pub sent: Vec<Vec<u8>>,
    pub recv_calls: usize,
    pub timeouts: Vec<Duration>,
}

impl ScriptedChannel {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn remaining_steps(&self) -> usize {
        self.steps.len()
    }
}

impl Channel for ScriptedChannel {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.sent.push(buf.to_vec());
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.recv_calls += 1;
        self.timeouts.push(timeout);
        let data = match self.steps.pop_front() {
            Some(Step::Data(data)) => data,
            Some(Step::Delayed(delay, data)) => {
                let until = Instant::now() + delay;
                while Instant::now() < until {
                    std::thread::sleep(until.saturating_duration_since(Instant::now()));
                }
                data
            }
            Some(Step::Closed) => return Ok(0),
            Some(Step::Fail(kind)) => return Err(kind.into()),
            Some(Step::Timeout) | None => return Err(io::ErrorKind::TimedOut.into()),
        };
        assert!(data.len() <= buf.len(), "scripted chunk exceeds read size");
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
