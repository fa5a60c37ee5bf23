use std::collections::BTreeMap;
use std::net::{SocketAddr, UdpSocket};

use super::{Result, SynthBackend};
use crate::message::{encode, Message, Packet, Value};
use crate::samples::Sample;
use crate::voice::VoiceHandle;

/// Forwards synth commands to an OSC synthesis server.
///
/// Node commands go to `synth`; definition sources go to `language`, which
/// compiles and installs them.
#[derive(Debug)]
pub struct OscBackend {
    socket: UdpSocket,
    synth: SocketAddr,
    language: SocketAddr,
}

impl OscBackend {
    pub fn connect(synth: SocketAddr, language: SocketAddr) -> Result<Self> {
        let bind: SocketAddr = if synth.is_ipv6() {
            ([0u16; 8], 0).into()
        } else {
            ([0u8; 4], 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        Ok(Self {
            socket,
            synth,
            language,
        })
    }

    fn send(&self, target: SocketAddr, message: Message) -> Result<()> {
        tracing::trace!(%message, %target, "osc out");
        let bytes = encode(&Packet::Message(message))?;
        self.socket.send_to(&bytes, target)?;
        Ok(())
    }
}

/// `/s_new` arguments: definition, node, add action, target, then pairs.
pub(crate) fn s_new(node: VoiceHandle, definition: &str, params: &BTreeMap<String, f32>) -> Message {
    let mut args = vec![
        Value::from(definition),
        Value::Int(node.node()),
        Value::Int(0),
        Value::Int(0),
    ];
    push_pairs(&mut args, params);
    Message::new("/s_new", args)
}

pub(crate) fn n_set(node: VoiceHandle, params: &BTreeMap<String, f32>) -> Message {
    let mut args = vec![Value::Int(node.node())];
    push_pairs(&mut args, params);
    Message::new("/n_set", args)
}

pub(crate) fn gate_off(node: VoiceHandle) -> Message {
    Message::new(
        "/n_set",
        vec![Value::Int(node.node()), Value::from("gate"), Value::Float(0.0)],
    )
}

pub(crate) fn alloc_read(sample: &Sample) -> Message {
    Message::new(
        "/b_allocRead",
        vec![
            Value::Int(sample.buffer),
            Value::from(sample.path.to_string_lossy().into_owned()),
        ],
    )
}

fn push_pairs(args: &mut Vec<Value>, params: &BTreeMap<String, f32>) {
    for (name, value) in params {
        args.push(Value::from(name.as_str()));
        args.push(Value::Float(*value));
    }
}

impl SynthBackend for OscBackend {
    fn spawn(
        &self,
        node: VoiceHandle,
        definition: &str,
        params: &BTreeMap<String, f32>,
    ) -> Result<()> {
        self.send(self.synth, s_new(node, definition, params))
    }

    fn set_params(&self, node: VoiceHandle, params: &BTreeMap<String, f32>) -> Result<()> {
        self.send(self.synth, n_set(node, params))
    }

    fn release(&self, node: VoiceHandle) -> Result<()> {
        self.send(self.synth, gate_off(node))
    }

    fn free(&self, node: VoiceHandle) -> Result<()> {
        self.send(
            self.synth,
            Message::new("/n_free", vec![Value::Int(node.node())]),
        )
    }

    fn load_sample(&self, sample: &Sample) -> Result<()> {
        self.send(self.synth, alloc_read(sample))
    }

    fn create_definition(&self, source: &str) -> Result<()> {
        self.run_source(&format!("{source}.add;"))
    }

    fn run_source(&self, source: &str) -> Result<()> {
        self.send(self.language, read_scd(source))
    }
}

pub(crate) fn read_scd(source: &str) -> Message {
    Message::new("/read_scd", vec![Value::from(source)])
}
