use std::sync::Arc;

use eframe::egui::{self, Color32};
use egui_plot::{Line, Plot, PlotPoints};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{error, warn};

use crate::config::{HISTORY_CAPACITY, POLL_INTERVAL};
use crate::data::{DeviceSnapshot, TelemetryView};
use crate::metric::MetricKind;
use crate::monitor::Sampler;
use crate::poller::Poller;
use crate::source::TelemetrySource;

// UI state persisted between runs
#[derive(Serialize, Deserialize)]
#[serde(default)]
struct Preferences {
    shown: Vec<MetricKind>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            shown: MetricKind::ALL.to_vec(),
        }
    }
}

// 应用程序状态
pub struct RgmApp<S: TelemetrySource> {
    sampler: Arc<Sampler<S>>,
    // Dropped with the app, which stops polling.
    _poller: Option<Poller>,
    prefs: Preferences,
}

impl<S: TelemetrySource> RgmApp<S> {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        sampler: Arc<Sampler<S>>,
        runtime: Handle,
    ) -> Self {
        let ctx = cc.egui_ctx.clone();
        let repaint = move || ctx.request_repaint();
        let poller = match Poller::spawn(Arc::clone(&sampler), runtime, POLL_INTERVAL, repaint) {
            Ok(poller) => Some(poller),
            Err(err) => {
                error!(%err, "failed to start poller thread");
                None
            }
        };

        let mut style = (*cc.egui_ctx.style()).clone();
        style.visuals.dark_mode = true;
        cc.egui_ctx.set_style(style);

        let prefs = cc
            .storage
            .and_then(|storage| eframe::get_value(storage, eframe::APP_KEY))
            .unwrap_or_default();

        Self {
            sampler,
            _poller: poller,
            prefs,
        }
    }

    fn toolbar(&mut self, ui: &mut egui::Ui, view: &TelemetryView) {
        ui.horizontal(|ui| {
            for kind in MetricKind::ALL {
                let mut on = self.prefs.shown.contains(&kind);
                if ui.checkbox(&mut on, kind.title()).changed() {
                    if on {
                        self.prefs.shown.push(kind);
                    } else {
                        self.prefs.shown.retain(|k| *k != kind);
                    }
                }
            }
            ui.separator();
            if ui.button("📋 Copy as JSON").clicked() {
                match serde_json::to_string_pretty(view) {
                    Ok(json) => ui.ctx().copy_text(json),
                    Err(err) => warn!(%err, "failed to serialize telemetry"),
                }
            }
        });
    }

    fn device_panel(
        &self,
        ui: &mut egui::Ui,
        snapshot: &DeviceSnapshot,
        history: &[DeviceSnapshot],
    ) {
        ui.heading(format!("GPU {}: {}", snapshot.index, snapshot.name));
        egui::Frame::group(ui.style()).show(ui, |ui| {
            ui.horizontal(|ui| {
                ui.vertical(|ui| {
                    ui.label(
                        egui::RichText::new(format!(
                            "GPU Utilization: {}%",
                            snapshot.gpu_utilization_percent
                        ))
                        .color(Color32::GREEN)
                        .size(20.0)
                        .strong(),
                    );
                    ui.label(format!("Temperature: {}°C", snapshot.temperature_celsius));
                    ui.label(format!("Fan Speed: {}%", snapshot.fan_speed_percent));
                });
                ui.separator();
                ui.vertical(|ui| {
                    ui.label(format!(
                        "Memory: {:.2}/{:.2} GB ({:.0}%)",
                        gib(snapshot.used_memory_bytes),
                        gib(snapshot.total_memory_bytes),
                        snapshot.memory_used_percent()
                    ));
                    ui.label(format!(
                        "Memory Controller: {}%",
                        snapshot.memory_utilization_percent
                    ));
                    ui.label(format!(
                        "Power: {:.2}/{} W",
                        snapshot.power_watts, snapshot.power_limit_watts
                    ));
                });
                ui.separator();
                ui.vertical(|ui| {
                    ui.label(format!("GPU Clock: {} MHz", snapshot.core_clock_mhz));
                    ui.label(format!("Memory Clock: {} MHz", snapshot.mem_clock_mhz));
                });
            });
        });

        let shown: Vec<MetricKind> = MetricKind::ALL
            .into_iter()
            .filter(|k| self.prefs.shown.contains(k))
            .collect();
        if shown.is_empty() {
            return;
        }
        let window_secs = HISTORY_CAPACITY as f64 * POLL_INTERVAL.as_secs_f64();
        ui.columns(shown.len(), |columns| {
            for (ui, kind) in columns.iter_mut().zip(shown) {
                ui.label(format!(
                    "{}: {}",
                    kind.title(),
                    kind.format(kind.value(snapshot))
                ));
                Plot::new(("history", snapshot.index, kind.title()))
                    .height(110.0)
                    .include_x(0.0)
                    .include_x(window_secs)
                    .include_y(0.0)
                    .include_y(kind.axis_max(history))
                    .allow_drag(false)
                    .allow_zoom(false)
                    .allow_scroll(false)
                    .x_axis_label("Seconds Ago")
                    .show(ui, |plot_ui| {
                        let points = PlotPoints::from(history_points(kind, history));
                        plot_ui.line(Line::new(kind.title(), points).color(kind_color(kind)));
                    });
            }
        });
    }
}

impl<S: TelemetrySource> eframe::App for RgmApp<S> {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let view = self.sampler.view();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("🚀 GPU Monitor");
            ui.label(format!("Driver: {}", view.driver_version));
            self.toolbar(ui, &view);
            ui.add_space(8.0);

            egui::ScrollArea::vertical().show(ui, |ui| {
                for snapshot in &view.current {
                    self.device_panel(ui, snapshot, view.history_for(snapshot.index));
                    ui.add_space(12.0);
                    ui.separator();
                }

                ui.heading("🧩 GPU Processes");
                egui::Grid::new("processes_grid")
                    .striped(true)
                    .spacing([12.0, 6.0])
                    .show(ui, |ui| {
                        ui.label(egui::RichText::new("GPU").strong());
                        ui.label(egui::RichText::new("PID").strong());
                        ui.label(egui::RichText::new("Name").strong());
                        ui.label(egui::RichText::new("Memory (MB)").strong());
                        ui.end_row();
                        let procs = view
                            .current
                            .iter()
                            .flat_map(|snapshot| view.processes_for(snapshot.index));
                        for proc in procs {
                            ui.label(proc.device_index.to_string());
                            ui.label(proc.pid.to_string());
                            ui.label(&proc.name);
                            ui.label(format!(
                                "{:.1}",
                                proc.memory_used_bytes as f64 / 1024.0 / 1024.0
                            ));
                            ui.end_row();
                        }
                    });
            });
        });

        // The poller repaints on every cycle; this only covers a stalled one.
        ctx.request_repaint_after(POLL_INTERVAL * 2);
    }

    fn save(&mut self, storage: &mut dyn eframe::Storage) {
        eframe::set_value(storage, eframe::APP_KEY, &self.prefs);
    }
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0 / 1024.0
}

fn kind_color(kind: MetricKind) -> Color32 {
    match kind {
        MetricKind::GpuUtilization => Color32::GREEN,
        MetricKind::MemoryUtilization => Color32::from_rgb(0, 128, 255),
        MetricKind::Temperature => Color32::from_rgb(255, 128, 0),
        MetricKind::PowerDraw => Color32::from_rgb(255, 0, 128),
    }
}

// x = seconds before the newest sample, one sample per poll interval
fn history_points(kind: MetricKind, history: &[DeviceSnapshot]) -> Vec<[f64; 2]> {
    let step = POLL_INTERVAL.as_secs_f64();
    let newest = history.len().saturating_sub(1);
    history
        .iter()
        .enumerate()
        .map(|(i, s)| [(newest - i) as f64 * step, kind.value(s)])
        .collect()
}
