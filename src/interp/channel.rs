//! Channels: bounded FIFO with blocking send/receive
//!
//! Buffered channels admit up to `capacity` queued values. Unbuffered
//! channels rendezvous: a send completes only while a receiver is waiting.
//! `select` uses the non-blocking probes.

use super::builtins::zero_value;
use super::error::{InterpResult, RuntimeError};
use super::value::Value;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// Shared channel handle
pub type ChannelRef = Arc<Channel>;

/// A typed channel
pub struct Channel {
    elem_type: String,
    capacity: usize,
    inner: Mutex<ChanInner>,
    send_cv: Condvar,
    recv_cv: Condvar,
}

struct ChanInner {
    queue: VecDeque<Value>,
    closed: bool,
    /// Receivers currently blocked in `recv`; the rendezvous quota for
    /// unbuffered sends
    recv_waiting: usize,
}

impl Channel {
    pub fn new(elem_type: impl Into<String>, capacity: usize) -> ChannelRef {
        Arc::new(Channel {
            elem_type: elem_type.into(),
            capacity,
            inner: Mutex::new(ChanInner {
                queue: VecDeque::new(),
                closed: false,
                recv_waiting: 0,
            }),
            send_cv: Condvar::new(),
            recv_cv: Condvar::new(),
        })
    }

    pub fn elem_type(&self) -> &str {
        &self.elem_type
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Slots a sender may fill right now
    fn send_quota(&self, inner: &ChanInner) -> usize {
        if self.capacity == 0 {
            inner.recv_waiting
        } else {
            self.capacity
        }
    }

    /// Blocking send; fails once the channel is closed, including a close
    /// that lands while the sender is waiting for space
    pub fn send(&self, value: Value) -> InterpResult<()> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(RuntimeError::channel("send on closed channel"));
            }
            if inner.queue.len() < self.send_quota(&inner) {
                inner.queue.push_back(value);
                self.recv_cv.notify_one();
                return Ok(());
            }
            self.send_cv.wait(&mut inner);
        }
    }

    /// Blocking receive: `(value, true)` for a delivered element,
    /// `(zero, false)` once the channel is closed and drained
    pub fn recv(&self) -> (Value, bool) {
        let mut inner = self.inner.lock();
        inner.recv_waiting += 1;
        // A newly announced receiver may unblock an unbuffered sender
        self.send_cv.notify_one();
        loop {
            if let Some(v) = inner.queue.pop_front() {
                inner.recv_waiting -= 1;
                self.send_cv.notify_one();
                return (v, true);
            }
            if inner.closed {
                inner.recv_waiting -= 1;
                return (zero_value(&self.elem_type), false);
            }
            self.recv_cv.wait(&mut inner);
        }
    }

    /// Non-blocking send probe for `select`: Ok(true) sent, Ok(false) would
    /// block, Err on closed channel
    pub fn try_send(&self, value: Value) -> InterpResult<bool> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RuntimeError::channel("send on closed channel"));
        }
        if inner.queue.len() < self.send_quota(&inner) {
            inner.queue.push_back(value);
            self.recv_cv.notify_one();
            return Ok(true);
        }
        Ok(false)
    }

    /// Non-blocking receive probe for `select`: None would block,
    /// Some((value, ok)) mirrors `recv`
    pub fn try_recv(&self) -> Option<(Value, bool)> {
        let mut inner = self.inner.lock();
        if let Some(v) = inner.queue.pop_front() {
            self.send_cv.notify_one();
            return Some((v, true));
        }
        if inner.closed {
            return Some((zero_value(&self.elem_type), false));
        }
        None
    }

    /// Mark closed and wake all waiters; closing twice is an error
    pub fn close(&self) -> InterpResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RuntimeError::channel("close of closed channel"));
        }
        inner.closed = true;
        self.send_cv.notify_all();
        self.recv_cv.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_buffered_send_recv() {
        let ch = Channel::new("int", 2);
        ch.send(Value::Int(1)).unwrap();
        ch.send(Value::Int(2)).unwrap();
        assert_eq!(ch.len(), 2);
        assert_eq!(ch.recv(), (Value::Int(1), true));
        assert_eq!(ch.recv(), (Value::Int(2), true));
    }

    #[test]
    fn test_buffered_send_blocks_until_recv() {
        let ch = Channel::new("int", 1);
        ch.send(Value::Int(1)).unwrap();

        let ch2 = ch.clone();
        let sender = thread::spawn(move || ch2.send(Value::Int(2)));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ch.recv(), (Value::Int(1), true));
        sender.join().unwrap().unwrap();
        assert_eq!(ch.recv(), (Value::Int(2), true));
    }

    #[test]
    fn test_unbuffered_rendezvous() {
        let ch = Channel::new("int", 0);
        // No receiver yet: try_send reports "would block"
        assert_eq!(ch.try_send(Value::Int(1)).unwrap(), false);

        let ch2 = ch.clone();
        let receiver = thread::spawn(move || ch2.recv());
        let ch3 = ch.clone();
        let sender = thread::spawn(move || ch3.send(Value::Int(42)));
        assert_eq!(receiver.join().unwrap(), (Value::Int(42), true));
        sender.join().unwrap().unwrap();
    }

    #[test]
    fn test_send_on_closed_fails() {
        let ch = Channel::new("int", 1);
        ch.close().unwrap();
        let err = ch.send(Value::Int(1)).unwrap_err();
        assert_eq!(err.message, "send on closed channel");
        let err = ch.try_send(Value::Int(1)).unwrap_err();
        assert_eq!(err.message, "send on closed channel");
    }

    #[test]
    fn test_double_close_fails() {
        let ch = Channel::new("int", 0);
        ch.close().unwrap();
        let err = ch.close().unwrap_err();
        assert_eq!(err.message, "close of closed channel");
    }

    #[test]
    fn test_recv_after_close_drains_then_zero() {
        let ch = Channel::new("int", 2);
        ch.send(Value::Int(7)).unwrap();
        ch.close().unwrap();
        assert_eq!(ch.recv(), (Value::Int(7), true));
        assert_eq!(ch.recv(), (Value::Int(0), false));
        assert_eq!(ch.recv(), (Value::Int(0), false));
    }

    #[test]
    fn test_close_wakes_blocked_receiver() {
        let ch = Channel::new("string", 0);
        let ch2 = ch.clone();
        let receiver = thread::spawn(move || ch2.recv());
        thread::sleep(Duration::from_millis(20));
        ch.close().unwrap();
        assert_eq!(receiver.join().unwrap(), (Value::Str(String::new()), false));
    }

    #[test]
    fn test_close_fails_blocked_sender() {
        let ch = Channel::new("int", 0);
        let ch2 = ch.clone();
        let sender = thread::spawn(move || ch2.send(Value::Int(1)));
        thread::sleep(Duration::from_millis(20));
        ch.close().unwrap();
        let err = sender.join().unwrap().unwrap_err();
        assert_eq!(err.message, "send on closed channel");
    }

    #[test]
    fn test_try_recv() {
        let ch = Channel::new("int", 1);
        assert!(ch.try_recv().is_none());
        ch.send(Value::Int(3)).unwrap();
        assert_eq!(ch.try_recv(), Some((Value::Int(3), true)));
        ch.close().unwrap();
        assert_eq!(ch.try_recv(), Some((Value::Int(0), false)));
    }

    #[test]
    fn test_fifo_order_across_threads() {
        let ch = Channel::new("int", 3);
        let ch2 = ch.clone();
        let producer = thread::spawn(move || {
            for i in 1..=3 {
                ch2.send(Value::Int(i)).unwrap();
            }
            ch2.close().unwrap();
        });
        let mut seen = Vec::new();
        loop {
            let (v, ok) = ch.recv();
            if !ok {
                break;
            }
            seen.push(v);
        }
        producer.join().unwrap();
        assert_eq!(seen, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }
}
