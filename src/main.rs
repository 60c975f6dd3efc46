use std::sync::Arc;
use std::time::Duration;

use camwatch::adapters::{
    capture::SchemeStreamOpener,
    http::{router_with_static, state::HttpState},
    onnx::yolo_engine::OnnxDetectorFactory,
    settings::json_file::{ensure_defaults, JsonSettingsFile},
    storage::sled_store::SledDetectionStore,
};
use camwatch::application::{
    engine::{EngineDeps, PipelineEngine},
    ports::SettingsSource,
    flusher::PersistenceFlusher,
    scheduler::FixedRateDriver,
    services::{PipelineService, RecordService, SettingsService},
};
use camwatch::config::AppConfig;
use camwatch::domain::settings::Receiver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Inicializar logs (RUST_LOG=info por defecto) y cargar .env
    dotenvy::dotenv().ok();
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cfg = AppConfig::from_env()?;
    tracing::info!("🔧 Inicializando adaptadores de infraestructura...");

    // 2. Ficheros de ajustes (se crean con valores por defecto si faltan)
    for (path, receiver) in [(&cfg.camera_settings, Receiver::Camera), (&cfg.model_settings, Receiver::Model)] {
        if ensure_defaults(path, receiver)? {
            tracing::info!("📝 Creado {} con valores por defecto", path.display());
        }
    }
    let camera_settings = Arc::new(JsonSettingsFile::new(&cfg.camera_settings, Receiver::Camera));
    let model_settings = Arc::new(JsonSettingsFile::new(&cfg.model_settings, Receiver::Model));

    // La cámara configurada tiene que tener backend en este binario (p. ej. RTSP sin `--features rtsp`)
    let opener = Arc::new(SchemeStreamOpener::new());
    if let Ok(camera) = camera_settings.read() {
        if let Err(e) = opener.check_settings(&camera) {
            anyhow::bail!("❌ {e}");
        }
    }

    // 3. Almacén de detecciones y detector
    let store = Arc::new(SledDetectionStore::open(&cfg.db_path)?);
    let detectors = Arc::new(OnnxDetectorFactory::new(&cfg.model_path));
    if let Err(e) = detectors.validate() {
        tracing::warn!("⚠️  {e}");
    }

    // 4. Motor del pipeline
    let engine = Arc::new(PipelineEngine::new(
        EngineDeps {
            camera_settings: camera_settings.clone(),
            detector_settings: model_settings.clone(),
            opener,
            detectors,
            sink: store.clone(),
        },
        cfg.engine_options(),
    ));

    // 5. Hilos de fondo: ciclo de detección y volcado periódico
    let drive_engine = engine.clone();
    let mut driver = FixedRateDriver::new(cfg.drive_interval).spawn("pipeline-drive", move || {
        drive_engine.drive_cycle();
    })?;
    let mut flusher = PersistenceFlusher::spawn(store.clone(), cfg.flush_interval)?;

    // 6. Servicios y estado de la API
    let state = HttpState {
        pipeline: Arc::new(PipelineService::new(engine.clone(), store.clone())),
        settings: Arc::new(SettingsService::new(camera_settings, model_settings, engine.clone())),
        records: Arc::new(RecordService::new(store)),
    };
    let app = router_with_static(state, &cfg.static_dir);

    // 7. Lanzar el servidor
    tracing::info!("🚀 Servidor iniciado en http://{}", cfg.bind);
    tracing::info!("📂 Archivos estáticos servidos desde '{}'", cfg.static_dir.display());

    let listener = tokio::net::TcpListener::bind(&cfg.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 8. Parada ordenada: ciclo, motor (Runner) y último volcado
    tracing::info!("🛑 Deteniendo...");
    let cycle_bound = cfg.connect_timeout + cfg.frame_timeout + Duration::from_secs(1);
    tokio::task::spawn_blocking(move || {
        driver.stop(cycle_bound);
        engine.shutdown();
        flusher.stop();
    })
    .await?;

    tracing::info!("👋 Hasta luego");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("No se pudo escuchar Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
