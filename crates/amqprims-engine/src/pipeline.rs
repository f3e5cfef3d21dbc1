//! Ordered handler chain between the application and the wire.
//!
//! Index 0 is the application end. Inbound events enter at the wire end and
//! travel toward index 0; outbound events enter at index 0 and travel toward
//! the wire. A handler forwards an event by firing it on its context, which
//! queues it for the neighbouring handler. Dispatch is an explicit loop over
//! a queue of `(index, event)` steps; events fired by a handler are processed
//! before anything queued earlier, so each event is fully handled before the
//! next one starts.

use std::collections::VecDeque;

use amqprims_codec::SaslPerformative;
use amqprims_frame::{FrameHandle, ProtocolFrame, ProtocolHeader};
use bytes::Bytes;
use tracing::{trace, warn};

use crate::engine::EngineCore;
use crate::error::{EngineError, Result};

/// An event travelling toward the application.
#[derive(Debug)]
pub enum ReadEvent {
    Bytes(Bytes),
    Header(ProtocolHeader),
    Sasl(SaslPerformative),
    Frame(ProtocolFrame),
}

/// An event travelling toward the wire.
#[derive(Debug)]
pub enum WriteEvent {
    Header(ProtocolHeader),
    Sasl(SaslPerformative),
    /// A pooled frame. Whoever consumes the event releases the frame.
    Frame(FrameHandle),
    Heartbeat,
    Bytes(Bytes),
}

/// One stage of the pipeline. Every hook forwards by default.
pub trait EngineHandler {
    /// Called once when the engine starts, before any traffic.
    fn engine_starting(&mut self, _ctx: &mut EngineHandlerContext<'_>) {}

    fn handle_read_bytes(&mut self, ctx: &mut EngineHandlerContext<'_>, bytes: Bytes) {
        ctx.fire_read(ReadEvent::Bytes(bytes));
    }

    fn handle_read_header(&mut self, ctx: &mut EngineHandlerContext<'_>, header: ProtocolHeader) {
        ctx.fire_read(ReadEvent::Header(header));
    }

    fn handle_read_sasl(&mut self, ctx: &mut EngineHandlerContext<'_>, body: SaslPerformative) {
        ctx.fire_read(ReadEvent::Sasl(body));
    }

    fn handle_read_frame(&mut self, ctx: &mut EngineHandlerContext<'_>, frame: ProtocolFrame) {
        ctx.fire_read(ReadEvent::Frame(frame));
    }

    fn handle_write_header(&mut self, ctx: &mut EngineHandlerContext<'_>, header: ProtocolHeader) {
        ctx.fire_write(WriteEvent::Header(header));
    }

    fn handle_write_sasl(&mut self, ctx: &mut EngineHandlerContext<'_>, body: SaslPerformative) {
        ctx.fire_write(WriteEvent::Sasl(body));
    }

    fn handle_write_frame(&mut self, ctx: &mut EngineHandlerContext<'_>, frame: FrameHandle) {
        ctx.fire_write(WriteEvent::Frame(frame));
    }

    fn handle_write_heartbeat(&mut self, ctx: &mut EngineHandlerContext<'_>) {
        ctx.fire_write(WriteEvent::Heartbeat);
    }

    fn handle_write_bytes(&mut self, ctx: &mut EngineHandlerContext<'_>, bytes: Bytes) {
        ctx.fire_write(WriteEvent::Bytes(bytes));
    }
}

enum Fired {
    Read(ReadEvent),
    Write(WriteEvent),
}

/// What a handler sees while processing one event.
pub struct EngineHandlerContext<'a> {
    core: &'a mut EngineCore,
    name: &'a str,
    fired: Vec<Fired>,
}

impl<'a> EngineHandlerContext<'a> {
    fn new(core: &'a mut EngineCore, name: &'a str) -> Self {
        Self {
            core,
            name,
            fired: Vec::new(),
        }
    }

    /// Name of the handler being invoked.
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn engine(&self) -> &EngineCore {
        self.core
    }

    pub fn engine_mut(&mut self) -> &mut EngineCore {
        self.core
    }

    /// Pass an event to the next handler toward the application.
    pub fn fire_read(&mut self, event: ReadEvent) {
        self.fired.push(Fired::Read(event));
    }

    /// Pass an event to the next handler toward the wire.
    pub fn fire_write(&mut self, event: WriteEvent) {
        self.fired.push(Fired::Write(event));
    }

    /// Fail the engine. Events already fired by this handler still drain.
    pub fn fail(&mut self, error: EngineError) {
        self.core.fail(error);
    }
}

enum Step {
    Read(usize, ReadEvent),
    Write(usize, WriteEvent),
}

struct Entry {
    name: String,
    handler: Box<dyn EngineHandler>,
}

/// Named handler chain. Mutable only until the engine starts.
#[derive(Default)]
pub struct EnginePipeline {
    entries: Vec<Entry>,
    locked: bool,
}

impl EnginePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler at the application end.
    pub fn add_first(
        &mut self,
        name: impl Into<String>,
        handler: Box<dyn EngineHandler>,
    ) -> Result<&mut Self> {
        self.check_mutable()?;
        self.entries.insert(
            0,
            Entry {
                name: name.into(),
                handler,
            },
        );
        Ok(self)
    }

    /// Add a handler at the wire end.
    pub fn add_last(
        &mut self,
        name: impl Into<String>,
        handler: Box<dyn EngineHandler>,
    ) -> Result<&mut Self> {
        self.check_mutable()?;
        self.entries.push(Entry {
            name: name.into(),
            handler,
        });
        Ok(self)
    }

    pub fn remove_first(&mut self) -> Result<&mut Self> {
        self.check_mutable()?;
        if !self.entries.is_empty() {
            self.entries.remove(0);
        }
        Ok(self)
    }

    pub fn remove_last(&mut self) -> Result<&mut Self> {
        self.check_mutable()?;
        self.entries.pop();
        Ok(self)
    }

    /// Remove every handler registered under `name`.
    pub fn remove(&mut self, name: &str) -> Result<&mut Self> {
        self.check_mutable()?;
        self.entries.retain(|entry| entry.name != name);
        Ok(self)
    }

    pub fn first(&self) -> Option<&str> {
        self.entries.first().map(|entry| entry.name.as_str())
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.last().map(|entry| entry.name.as_str())
    }

    /// Handler names from the application end to the wire end.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    fn check_mutable(&self) -> Result<()> {
        if self.locked {
            return Err(EngineError::state(
                "pipeline cannot change once the engine has started",
            ));
        }
        Ok(())
    }

    pub(crate) fn start(&mut self, core: &mut EngineCore) {
        self.locked = true;
        for entry in &mut self.entries {
            let mut ctx = EngineHandlerContext::new(core, &entry.name);
            entry.handler.engine_starting(&mut ctx);
            // handlers cannot emit traffic before start completes
            debug_assert!(ctx.fired.is_empty());
        }
    }

    /// Feed inbound bytes in at the wire end and run until quiescent.
    pub(crate) fn ingest(&mut self, core: &mut EngineCore, bytes: Bytes) {
        let wire_end = self.entries.len().checked_sub(1);
        match wire_end {
            Some(index) => self.run(core, Some(Step::Read(index, ReadEvent::Bytes(bytes)))),
            None => warn!("no handlers installed; inbound bytes dropped"),
        }
    }

    /// Drain writes queued by the state machine.
    pub(crate) fn flush(&mut self, core: &mut EngineCore) {
        self.run(core, None);
    }

    fn run(&mut self, core: &mut EngineCore, initial: Option<Step>) {
        let mut queue: VecDeque<Step> = initial.into_iter().collect();
        loop {
            // state machine output enters at the application end
            let queued: Vec<WriteEvent> = core.io.writes.drain(..).collect();
            for event in queued.into_iter().rev() {
                queue.push_front(Step::Write(0, event));
            }

            let Some(step) = queue.pop_front() else {
                break;
            };
            let (index, fired) = match step {
                Step::Read(index, event) => {
                    if !core.accepts_reads() {
                        trace!("engine failed; inbound event dropped");
                        continue;
                    }
                    let entry = &mut self.entries[index];
                    let mut ctx = EngineHandlerContext::new(core, &entry.name);
                    let handler = &mut entry.handler;
                    match event {
                        ReadEvent::Bytes(bytes) => handler.handle_read_bytes(&mut ctx, bytes),
                        ReadEvent::Header(header) => handler.handle_read_header(&mut ctx, header),
                        ReadEvent::Sasl(body) => handler.handle_read_sasl(&mut ctx, body),
                        ReadEvent::Frame(frame) => handler.handle_read_frame(&mut ctx, frame),
                    }
                    (index, ctx.fired)
                }
                Step::Write(index, event) => {
                    if !core.accepts_writes() {
                        discard(core, event);
                        continue;
                    }
                    if index >= self.entries.len() {
                        to_wire(core, event);
                        continue;
                    }
                    let entry = &mut self.entries[index];
                    let mut ctx = EngineHandlerContext::new(core, &entry.name);
                    let handler = &mut entry.handler;
                    match event {
                        WriteEvent::Header(header) => handler.handle_write_header(&mut ctx, header),
                        WriteEvent::Sasl(body) => handler.handle_write_sasl(&mut ctx, body),
                        WriteEvent::Frame(frame) => handler.handle_write_frame(&mut ctx, frame),
                        WriteEvent::Heartbeat => handler.handle_write_heartbeat(&mut ctx),
                        WriteEvent::Bytes(bytes) => handler.handle_write_bytes(&mut ctx, bytes),
                    }
                    (index, ctx.fired)
                }
            };

            for fired in fired.into_iter().rev() {
                match fired {
                    Fired::Read(event) if index == 0 => {
                        trace!(?event, "inbound event reached the application end unhandled");
                    }
                    Fired::Read(event) => queue.push_front(Step::Read(index - 1, event)),
                    Fired::Write(event) => queue.push_front(Step::Write(index + 1, event)),
                }
            }
        }
        core.end_dispatch();
    }
}

fn to_wire(core: &mut EngineCore, event: WriteEvent) {
    match event {
        WriteEvent::Bytes(bytes) => core.emit_output(bytes),
        other => {
            warn!(?other, "outbound event reached the wire unserialized");
            discard(core, other);
        }
    }
}

fn discard(core: &mut EngineCore, event: WriteEvent) {
    if let WriteEvent::Frame(handle) = event {
        core.io.pool.release(handle);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::config::EngineConfiguration;

    struct Recorder {
        label: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl EngineHandler for Recorder {
        fn handle_read_bytes(&mut self, ctx: &mut EngineHandlerContext<'_>, bytes: Bytes) {
            self.log.borrow_mut().push(format!("read:{}", self.label));
            ctx.fire_read(ReadEvent::Bytes(bytes));
        }

        fn handle_write_bytes(&mut self, ctx: &mut EngineHandlerContext<'_>, bytes: Bytes) {
            self.log.borrow_mut().push(format!("write:{}", self.label));
            ctx.fire_write(WriteEvent::Bytes(bytes));
        }
    }

    fn recorder(label: &'static str, log: &Rc<RefCell<Vec<String>>>) -> Box<dyn EngineHandler> {
        Box::new(Recorder {
            label,
            log: Rc::clone(log),
        })
    }

    #[test]
    fn test_reads_travel_toward_application_and_writes_toward_wire() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = EnginePipeline::new();
        pipeline
            .add_last("a", recorder("a", &log))
            .unwrap()
            .add_last("b", recorder("b", &log))
            .unwrap()
            .add_first("app", recorder("app", &log))
            .unwrap();
        assert_eq!(pipeline.names().collect::<Vec<_>>(), ["app", "a", "b"]);

        let mut core = EngineCore::new(EngineConfiguration::default());
        pipeline.ingest(&mut core, Bytes::from_static(b"x"));
        core.io.writes.push_back(WriteEvent::Bytes(Bytes::from_static(b"y")));
        pipeline.flush(&mut core);

        assert_eq!(
            *log.borrow(),
            ["read:b", "read:a", "read:app", "write:app", "write:a", "write:b"]
        );
        assert_eq!(&core.take_output()[..], b"y");
    }

    #[test]
    fn test_locked_after_start() {
        let mut pipeline = EnginePipeline::new();
        let mut core = EngineCore::new(EngineConfiguration::default());
        pipeline.start(&mut core);
        let err = pipeline
            .add_last("late", Box::new(Forwarder))
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::State(_)));
        assert!(pipeline.remove("late").is_err());
    }

    #[test]
    fn test_remove_by_name() {
        let mut pipeline = EnginePipeline::new();
        pipeline
            .add_last("a", Box::new(Forwarder))
            .unwrap()
            .add_last("b", Box::new(Forwarder))
            .unwrap()
            .remove("a")
            .unwrap();
        assert_eq!(pipeline.first(), Some("b"));
        assert_eq!(pipeline.last(), Some("b"));
        pipeline.remove_last().unwrap();
        assert!(pipeline.is_empty());
    }

    struct Forwarder;

    impl EngineHandler for Forwarder {}
}
