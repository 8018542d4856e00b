//! The three pipelines and the watch table.
//!
//! ```text
//! build      = reset → (copy:* ∥ html ∥ scss:* ∥ js)
//! deploy-zip = build → zip
//! dev        = build → (watch ∥ serve)
//! ```

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::alert::{AlertSink, Console};
use crate::engine::{self, Binding, Diagnostics, Dispatcher, Plan, Policy};
use crate::error::SitepipeError;
use crate::task::Task;
use crate::tasks::{Archive, Bundle, Html, Mirror, Reset, Stylesheet};
use crate::{Config, Layout};

/// Every task of a pipeline, constructed once from the configuration. The
/// same instances are shared by the initial build and the watcher.
#[derive(Debug, Clone)]
pub struct Tasks {
    pub reset: Arc<dyn Task>,
    pub copy_img: Arc<dyn Task>,
    pub copy_fonts: Arc<dyn Task>,
    pub copy_lib: Arc<dyn Task>,
    pub copy_scss: Arc<dyn Task>,
    pub copy_js: Arc<dyn Task>,
    pub html: Arc<dyn Task>,
    pub style: Arc<dyn Task>,
    pub bootstrap: Arc<dyn Task>,
    pub js: Arc<dyn Task>,
}

impl Tasks {
    pub fn new(config: &Config) -> Self {
        let Layout { src, out, .. } = &config.layout;
        let mode = config.mode;

        Self {
            reset: Arc::new(Reset::new(out.clone())),
            copy_img: Arc::new(Mirror::images("img", src, out, mode)),
            copy_fonts: Arc::new(Mirror::new("fonts", src, out)),
            copy_lib: Arc::new(Mirror::new("lib", src, out)),
            copy_scss: Arc::new(Mirror::new("scss", src, out)),
            copy_js: Arc::new(Mirror::new("js", src, out)),
            html: Arc::new(Html::new(src.clone(), out.clone())),
            style: Arc::new(Stylesheet::new("style", "", src, out, mode)),
            bootstrap: Arc::new(Stylesheet::new("bootstrap", ".min", src, out, mode)),
            js: Arc::new(Bundle::new(src, out, mode, config.esbuild.clone())),
        }
    }

    /// Everything that writes into the output tree, run concurrently.
    pub fn main(&self) -> Plan {
        Plan::parallel(
            [
                &self.copy_img,
                &self.copy_fonts,
                &self.copy_lib,
                &self.copy_scss,
                &self.copy_js,
                &self.html,
                &self.style,
                &self.bootstrap,
                &self.js,
            ]
            .map(|task| Plan::Task(task.clone())),
        )
    }

    /// Reset, then the main group.
    pub fn build_plan(&self) -> Plan {
        Plan::series([Plan::Task(self.reset.clone()), self.main()])
    }

    /// Which task answers a change to which source files. Patterns are
    /// relative to the project root.
    pub fn bindings(&self) -> Result<Vec<Binding>, glob::PatternError> {
        let table: [(&str, &Arc<dyn Task>); 9] = [
            ("src/img/**/*.*", &self.copy_img),
            ("src/fonts/**/*.*", &self.copy_fonts),
            ("src/lib/**/*.*", &self.copy_lib),
            ("src/**/*.html", &self.html),
            ("src/scss/**/*.scss", &self.style),
            ("src/scss/**/*.scss", &self.copy_scss),
            ("src/scss/bootstrap.scss", &self.bootstrap),
            ("src/js/**/*.js", &self.js),
            ("src/js/**/*.js", &self.copy_js),
        ];

        table
            .into_iter()
            .map(|(pattern, task)| Binding::new(pattern, task.clone()))
            .collect()
    }

    pub fn dispatcher(&self, root: &Utf8Path) -> Result<Dispatcher, glob::PatternError> {
        Ok(Dispatcher::new(root, self.bindings()?))
    }
}

/// One-shot build. Any task failure fails the run.
pub fn build(config: &Config) -> Result<Diagnostics, SitepipeError> {
    let tasks = Tasks::new(config);

    tracing::info!(mode = ?config.mode, "building {}", config.layout.out);
    let diagnostics = engine::run(&tasks.build_plan().lower(), Policy::Abort, &Console)?;

    Ok(diagnostics)
}

/// Build, then package the output tree. Returns the archive path.
pub fn deploy_zip(config: &Config) -> Result<Utf8PathBuf, SitepipeError> {
    let tasks = Tasks::new(config);
    let archive = Archive::new(config.layout.out.clone(), config.layout.archive());
    let target = archive.target().to_owned();

    tracing::info!(mode = ?config.mode, "building {}", target);
    let plan = Plan::series([tasks.build_plan(), Plan::task(archive)]);
    engine::run(&plan.lower(), Policy::Abort, &Console)?;

    Ok(target)
}

/// Build, then watch and serve until the process is terminated. Task
/// failures become alerts; only a failed reset stops the pipeline.
pub fn dev(config: &Config) -> Result<(), SitepipeError> {
    let tasks = Tasks::new(config);
    let alerts: Arc<dyn AlertSink> = Arc::new(Console);

    tracing::info!("running initial build...");
    engine::run(&tasks.build_plan().lower(), Policy::Report, alerts.as_ref())?;

    let dispatcher = tasks.dispatcher(&config.layout.root)?;
    tracing::info!("initial build completed, now watching for changes...");
    engine::watch(config, dispatcher, alerts)?;

    Ok(())
}
