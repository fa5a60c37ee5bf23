use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{file_stem, Result, ScoreRenderer};
use crate::error::BackendError;
use crate::message::{decode, encode, Message, Packet, Value};
use crate::nrt::Score;

/// Asks the language host to execute a script file.
pub const READ_SCD_FILE: &str = "/read_scd_file";
/// Sent by a rendering script once its audio file is complete.
pub const NRT_DONE: &str = "/nrt_done";
pub const RENDER_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_REPLY: usize = 8192;

/// Renders scores through the language host.
///
/// Each score becomes a script that records the score offline and then
/// sends `/nrt_done "ok" <name>` back to this renderer's socket. Scripts are
/// usually too large for one datagram, so the host is sent the file path
/// with `/read_scd_file`. [`ScoreRenderer::render`] blocks until the
/// confirmation arrives or the timeout passes.
#[derive(Debug)]
pub struct ScriptScoreRenderer {
    dir: PathBuf,
    language: SocketAddr,
    socket: UdpSocket,
    timeout: Duration,
}

impl ScriptScoreRenderer {
    /// Binds the confirmation socket on the loopback interface.
    pub fn connect(dir: impl Into<PathBuf>, language: SocketAddr) -> Result<Self> {
        let bind: SocketAddr = if language.is_ipv6() {
            (Ipv6Addr::LOCALHOST, 0).into()
        } else {
            (Ipv4Addr::LOCALHOST, 0).into()
        };
        Ok(Self {
            dir: dir.into(),
            language,
            socket: UdpSocket::bind(bind)?,
            timeout: RENDER_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Address the rendering script reports back to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn await_done(&self, name: &str) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_REPLY];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BackendError::RenderTimeout {
                    name: name.to_owned(),
                    waited: self.timeout,
                });
            }
            self.socket.set_read_timeout(Some(remaining))?;
            match self.socket.recv_from(&mut buf) {
                Ok((size, from)) => match decode(&buf[..size]) {
                    Ok(Packet::Message(message)) if confirms(&message, name) => return Ok(()),
                    Ok(_) => tracing::debug!(%from, "ignoring datagram while awaiting render"),
                    Err(err) => tracing::debug!(%from, %err, "undecodable datagram while awaiting render"),
                },
                Err(err) if matches!(err.kind(), IoErrorKind::WouldBlock | IoErrorKind::TimedOut) => {}
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl ScoreRenderer for ScriptScoreRenderer {
    fn render(&self, score: &Score) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let dir = fs::canonicalize(&self.dir)?;
        let stem = file_stem(&score.output_name);
        let script_path = dir.join(format!("{stem}.scd"));
        let audio_path = dir.join(audio_name(&stem));

        let text = script(score, &audio_path, self.local_addr()?);
        fs::write(&script_path, text)?;
        tracing::info!(path = %script_path.display(), rows = score.rows.len(), "render script written");

        let request = Message::new(
            READ_SCD_FILE,
            vec![Value::from(script_path.to_string_lossy().into_owned())],
        );
        self.socket
            .send_to(&encode(&Packet::Message(request))?, self.language)?;
        tracing::info!(output = %score.output_name, timeout = ?self.timeout, "awaiting render");
        self.await_done(&score.output_name)?;
        tracing::info!(path = %audio_path.display(), "render confirmed");
        Ok(audio_path)
    }
}

/// `/nrt_done "ok"`, optionally followed by the session's output name.
fn confirms(message: &Message, name: &str) -> bool {
    if message.address != NRT_DONE {
        return false;
    }
    match message.args.as_slice() {
        [Value::String(ok)] => ok == "ok",
        [Value::String(ok), Value::String(output)] => ok == "ok" && output == name,
        _ => false,
    }
}

fn audio_name(stem: &str) -> String {
    if stem.to_ascii_lowercase().ends_with(".wav") {
        stem.to_owned()
    } else {
        format!("{stem}.wav")
    }
}

/// Script that records `score` into `audio_path` and reports to `reply`.
fn script(score: &Score, audio_path: &Path, reply: SocketAddr) -> String {
    let mut rows = Vec::new();
    for definition in &score.definitions {
        rows.push(format!("[0.0, ['/d_recv', {definition}.asBytes]]"));
    }
    for buffer in &score.buffers {
        rows.push(row(0.0, buffer));
    }
    for score_row in &score.rows {
        rows.push(row(score_row.seconds, &score_row.message));
    }
    rows.push(format!("[{:?}, ['/c_set', 0, 0]]", score.end_seconds.max(0.0)));

    let mut text = String::from("(\n");
    text.push_str("var options = ServerOptions.new.numOutputBusChannels_(2);\n");
    text.push_str("var score = Score([\n");
    for entry in &rows {
        let _ = writeln!(text, "    {entry},");
    }
    text.push_str("]);\n");
    let _ = writeln!(text, "score.recordNRT(");
    let _ = writeln!(
        text,
        "    outputFilePath: {},",
        quoted(&audio_path.to_string_lossy())
    );
    text.push_str("    headerFormat: \"wav\",\n");
    text.push_str("    sampleFormat: \"int24\",\n");
    text.push_str("    options: options,\n");
    let _ = writeln!(text, "    duration: {:?},", score.end_seconds.max(0.0));
    let _ = writeln!(
        text,
        "    action: {{ NetAddr({}, {}).sendMsg('{NRT_DONE}', \"ok\", {}) }}",
        quoted(&reply.ip().to_string()),
        reply.port(),
        quoted(&score.output_name)
    );
    text.push_str(");\n)\n");
    text
}

fn row(seconds: f32, message: &Message) -> String {
    let mut entry = format!("[{seconds:?}, ['{}'", message.address);
    for value in &message.args {
        entry.push_str(", ");
        entry.push_str(&literal(value));
    }
    entry.push_str("]]");
    entry
}

fn literal(value: &Value) -> String {
    match value {
        Value::Int(value) => value.to_string(),
        Value::Float(value) if value.is_finite() => format!("{value:?}"),
        Value::Float(value) if value.is_nan() => "0.0".to_owned(),
        Value::Float(value) if *value > 0.0 => "inf".to_owned(),
        Value::Float(_) => "-inf".to_owned(),
        Value::String(value) => quoted(value),
        Value::Time(tag) => tag.seconds.to_string(),
    }
}

fn quoted(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}
