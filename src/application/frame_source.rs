//! Captura continua en un hilo propio con un buffer de una sola posición.
//!
//! El hilo de captura mantiene viva la conexión (reintenta sin límite) y publica
//! siempre el último frame decodificado; los lectores bloquean con timeout hasta
//! que hay un frame *nuevo*, así el detector nunca procesa dos veces el mismo.

use chrono::Utc;
use image::RgbImage;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::application::ports::{StreamOpener, VideoStream};
use crate::application::worker::{StopToken, WorkerHandle};
use crate::domain::{
    errors::{DomainResult, PipelineError},
    stream::Frame,
};

/// Por defecto cubre el timeout de lectura de los backends (2 s) con margen.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(3);
/// Holgura sobre `StreamOpener::max_block` al esperar al hilo de captura.
const JOIN_MARGIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Disconnected,
    Connecting,
    Streaming,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct FrameSourceOptions {
    /// Espera entre intentos fallidos de abrir el stream.
    pub reconnect_backoff: Duration,
    /// Cota mínima de espera al hacer join del hilo de captura en `stop`.
    /// La cota real nunca baja de `StreamOpener::max_block` más un margen.
    pub join_timeout: Duration,
}

impl Default for FrameSourceOptions {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_millis(500),
            join_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    /// `false` cuando el frame actual ya se entregó a un lector.
    fresh: bool,
    closed: bool,
    last_seq: u64,
}

struct Shared {
    slot: Mutex<Slot>,
    available: Condvar,
    state: Mutex<SourceState>,
}

impl Shared {
    fn set_state(&self, next: SourceState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = ?*state, to = ?next, "frame source");
            *state = next;
        }
    }

    /// Sustituye el contenido del buffer. Devuelve `false` si la fuente ya está cerrada.
    fn publish(&self, image: RgbImage) -> bool {
        let mut slot = self.slot.lock();
        if slot.closed {
            return false;
        }
        slot.last_seq += 1;
        slot.frame = Some(Frame { seq: slot.last_seq, captured_at: Utc::now(), image });
        slot.fresh = true;
        drop(slot);
        self.available.notify_all();
        true
    }
}

pub struct FrameSource {
    address: String,
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
    join_timeout: Duration,
}

impl FrameSource {
    /// Abre el stream en el hilo que llama y, si lo consigue, arranca el hilo de captura.
    /// Un primer intento fallido se devuelve como `ConnectFailed`.
    pub fn start(
        opener: Arc<dyn StreamOpener>,
        address: &str,
        fps: u32,
        options: FrameSourceOptions,
    ) -> DomainResult<Self> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::default()),
            available: Condvar::new(),
            state: Mutex::new(SourceState::Connecting),
        });

        let join_timeout = options.join_timeout.max(opener.max_block() + JOIN_MARGIN);
        let stream = opener.open(address, fps).map_err(|e| match e {
            PipelineError::ConnectFailed { .. } => e,
            other => PipelineError::connect(address, other.to_string()),
        })?;
        shared.set_state(SourceState::Streaming);
        info!(address, fps, "Frame source conectado");

        let loop_shared = shared.clone();
        let loop_address = address.to_string();
        let backoff = options.reconnect_backoff;
        let worker = WorkerHandle::spawn("frame-source", move |token| {
            capture_loop(token, loop_shared, opener, loop_address, fps, backoff, stream);
        })
        .map_err(|e| PipelineError::connect(address, format!("no se pudo lanzar el hilo de captura: {e}")))?;

        Ok(Self {
            address: address.to_string(),
            shared,
            worker: Mutex::new(Some(worker)),
            join_timeout,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> SourceState {
        *self.shared.state.lock()
    }

    /// `false` si el hilo de captura terminó (por parada o por panic).
    pub fn is_alive(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Bloquea hasta que haya un frame que este lector todavía no ha visto, o hasta `timeout`.
    /// Devuelve una copia; el buffer sigue perteneciendo a la fuente.
    pub fn get_latest_frame(&self, timeout: Duration) -> DomainResult<Frame> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            if slot.fresh {
                if let Some(frame) = slot.frame.clone() {
                    slot.fresh = false;
                    return Ok(frame);
                }
            }
            if slot.closed || Instant::now() >= deadline {
                return Err(PipelineError::FrameTimeout);
            }
            self.shared.available.wait_until(&mut slot, deadline);
        }
    }

    /// Secuencia del último frame publicado (0 si todavía no hay ninguno).
    pub fn last_seq(&self) -> u64 {
        self.shared.slot.lock().last_seq
    }

    /// Detiene la captura: cierra el buffer, para el hilo y espera su salida con cota.
    /// El hilo suelta el stream antes de terminar. Idempotente.
    pub fn stop(&self) {
        {
            let mut slot = self.shared.slot.lock();
            if slot.closed {
                return;
            }
            slot.closed = true;
        }
        self.shared.available.notify_all();

        if let Some(mut worker) = self.worker.lock().take() {
            if !worker.stop(self.join_timeout) {
                warn!(address = %self.address, "el hilo de captura sigue bloqueado; liberará el stream al salir");
            }
        }
        self.shared.set_state(SourceState::Stopped);
        info!(address = %self.address, "Frame source detenido");
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    token: StopToken,
    shared: Arc<Shared>,
    opener: Arc<dyn StreamOpener>,
    address: String,
    fps: u32,
    backoff: Duration,
    initial: Box<dyn VideoStream>,
) {
    let mut stream: Option<Box<dyn VideoStream>> = Some(initial);

    while !token.is_stopped() {
        let Some(active) = stream.as_mut() else {
            shared.set_state(SourceState::Connecting);
            match opener.open(&address, fps) {
                Ok(s) => {
                    info!(%address, "Stream reabierto");
                    shared.set_state(SourceState::Streaming);
                    stream = Some(s);
                }
                Err(e) => {
                    debug!(%address, error = %e, "reintento de conexión fallido");
                    shared.set_state(SourceState::Disconnected);
                    if token.wait_for(backoff) {
                        break;
                    }
                }
            }
            continue;
        };

        match active.read_frame() {
            Ok(image) => {
                if !shared.publish(image) {
                    break;
                }
            }
            Err(e) => {
                warn!(%address, error = %e, "Fallo leyendo frame; reconectando");
                stream = None;
                shared.set_state(SourceState::Disconnected);
            }
        }
    }

    drop(stream);
    shared.set_state(SourceState::Stopped);
}
