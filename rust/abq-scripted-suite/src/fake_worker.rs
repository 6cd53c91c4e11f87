//! The supervisor side of the protocol, for driving a runner in tests.
//!
//! [`FakeWorker`] listens on loopback TCP like a real ABQ worker does.
//! [`ScriptedStream`] is the in-memory equivalent: every message the worker
//! would send is queued before the runner starts, which works because the
//! runner never needs a reply to depend on what it wrote.

use std::io::{self, Cursor, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use abq_native_runner::WorkerError;
use abq_native_runner::codec::{FramedStream, Incoming};
use abq_protocol::{
    InitMessage, InitSuccess, Manifest, ManifestMessage, NativeRunnerSpawned, TestCaseMessage,
    TestResult, TestResultMessage,
};
use serde::Serialize;
use serde_json::Value;

/// What the fake worker asks of the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum Script {
    /// Expect a manifest (the runner must be in manifest mode).
    Manifest,
    /// Send `init`, then every directive, then close.
    Run {
        init: InitMessage,
        directives: Vec<TestCaseMessage>,
    },
}

impl Script {
    /// Run `ids` in order with the given shared ordering.
    pub fn run<I, S>(init: InitMessage, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Run {
            init,
            directives: ids.into_iter().map(TestCaseMessage::new).collect(),
        }
    }
}

/// Everything the runner sent, decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub spawned: Option<NativeRunnerSpawned>,
    pub manifest: Option<Manifest>,
    pub init_acknowledged: bool,
    pub results: Vec<TestResult>,
}

impl Transcript {
    pub fn result_ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.id.as_str()).collect()
    }
}

pub struct FakeWorker {
    listener: TcpListener,
}

impl FakeWorker {
    pub fn bind() -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind("127.0.0.1:0")?,
        })
    }

    /// `host:port` to hand the runner as `ABQ_SOCKET`.
    pub fn addr(&self) -> io::Result<String> {
        Ok(self.listener.local_addr()?.to_string())
    }

    /// Accept one runner on a background thread and play `script`.
    pub fn spawn(self, script: Script) -> JoinHandle<Result<Transcript, WorkerError>> {
        thread::spawn(move || {
            let (stream, peer) = self.listener.accept()?;
            tracing::debug!(%peer, "runner connected");
            serve(stream, script)
        })
    }
}

fn serve(stream: TcpStream, script: Script) -> Result<Transcript, WorkerError> {
    let mut framed = FramedStream::new(stream);
    let mut transcript = Transcript {
        spawned: framed.read::<NativeRunnerSpawned>()?.into_message(),
        ..Transcript::default()
    };
    if transcript.spawned.is_none() {
        return Ok(transcript);
    }

    match script {
        Script::Manifest => {
            transcript.manifest = framed
                .read::<ManifestMessage>()?
                .into_message()
                .map(|message| message.manifest);
        }
        Script::Run { init, directives } => {
            framed.write(&init)?;
            for directive in &directives {
                framed.write(directive)?;
            }
            framed.get_ref().shutdown(Shutdown::Write)?;

            transcript.init_acknowledged = framed.read::<InitSuccess>()?.into_message().is_some();
            while let Incoming::Message(message) = framed.read::<TestResultMessage>()? {
                transcript.results.push(message.test_result);
            }
        }
    }
    Ok(transcript)
}

/// An in-memory connection with everything the worker will send already
/// queued. Collects everything the runner writes.
#[derive(Debug, Default)]
pub struct ScriptedStream {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl ScriptedStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one framed message for the runner to read.
    pub fn queue<T: Serialize>(mut self, message: &T) -> Result<Self, WorkerError> {
        let mut framed = FramedStream::new(ScriptedStream::default());
        framed.write(message)?;
        let frame = framed.into_inner().output;
        self.input.get_mut().extend_from_slice(&frame);
        Ok(self)
    }

    /// The usual run: init followed by directives for `ids`.
    pub fn run<I, S>(init: &InitMessage, ids: I) -> Result<Self, WorkerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ids.into_iter().try_fold(Self::new().queue(init)?, |stream, id| {
            stream.queue(&TestCaseMessage::new(id))
        })
    }

    /// Every message the runner wrote, as raw JSON.
    pub fn written(&self) -> Vec<Value> {
        let mut framed = FramedStream::new(ScriptedStream {
            input: Cursor::new(self.output.clone()),
            output: Vec::new(),
        });
        let mut messages = Vec::new();
        while let Ok(Incoming::Message(message)) = framed.read::<Value>() {
            messages.push(message);
        }
        messages
    }

    /// The runner's output decoded the way a worker in run mode reads it.
    pub fn transcript(&self) -> Transcript {
        let mut messages = self.written().into_iter();
        let mut transcript = Transcript {
            spawned: messages
                .next()
                .and_then(|m| serde_json::from_value(m).ok()),
            ..Transcript::default()
        };
        for message in messages {
            if let Ok(ManifestMessage { manifest }) = serde_json::from_value(message.clone()) {
                transcript.manifest = Some(manifest);
            } else if let Ok(TestResultMessage { test_result }) =
                serde_json::from_value(message.clone())
            {
                transcript.results.push(test_result);
            } else if message == Value::Object(Default::default()) {
                transcript.init_acknowledged = true;
            }
        }
        transcript
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
