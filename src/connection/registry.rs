//! Globals, outputs and shm formats advertised by the server

use crate::geometry::Rect;
use crate::protocol::{ObjectId, PixelFormat, ProtocolEvent};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalInfo {
    pub interface: String,
    pub version: u32,
}

/// A monitor as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output {
    pub id: ObjectId,
    pub rect: Rect,
    pub scale: u32,
}

/// What a registry event changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    None,
    Globals,
    Formats,
    Outputs,
}

#[derive(Debug, Default)]
pub struct Registry {
    globals: HashMap<u32, GlobalInfo>,
    outputs: BTreeMap<ObjectId, Output>,
    formats: Vec<PixelFormat>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a registry-level event into the tables. Events that do not
    /// belong to the registry are ignored.
    pub fn apply(&mut self, event: &ProtocolEvent) -> RegistryChange {
        match event {
            ProtocolEvent::Global {
                name,
                interface,
                version,
            } => {
                debug!("🌐 Global {} v{} (name {})", interface, version, name);
                self.globals.insert(
                    *name,
                    GlobalInfo {
                        interface: interface.clone(),
                        version: *version,
                    },
                );
                RegistryChange::Globals
            }
            ProtocolEvent::GlobalRemove { name } => match self.globals.remove(name) {
                Some(global) => {
                    info!("🌐 Global {} removed", global.interface);
                    RegistryChange::Globals
                }
                None => RegistryChange::None,
            },
            ProtocolEvent::ShmFormat { format } => match PixelFormat::from_wire(*format) {
                Some(format) if !self.formats.contains(&format) => {
                    debug!("🎨 Server supports {:?}", format);
                    self.formats.push(format);
                    RegistryChange::Formats
                }
                Some(_) => RegistryChange::None,
                None => {
                    // Formats we cannot render into are simply never chosen
                    warn!("🎨 Skipping unknown shm format {:#x}", format);
                    RegistryChange::None
                }
            },
            ProtocolEvent::OutputAdded { output, rect, scale }
            | ProtocolEvent::OutputChanged { output, rect, scale } => {
                let scale = if *scale == 0 {
                    warn!("🖥️ Output {:?} reported scale 0, using 1", output);
                    1
                } else {
                    *scale
                };
                info!(
                    "🖥️ Output {:?}: {}x{} at ({}, {}) scale {}",
                    output, rect.width, rect.height, rect.x, rect.y, scale
                );
                self.outputs.insert(
                    *output,
                    Output {
                        id: *output,
                        rect: *rect,
                        scale,
                    },
                );
                RegistryChange::Outputs
            }
            ProtocolEvent::OutputRemoved { output } => {
                if self.outputs.remove(output).is_some() {
                    info!("🖥️ Output {:?} removed", output);
                    RegistryChange::Outputs
                } else {
                    RegistryChange::None
                }
            }
            _ => RegistryChange::None,
        }
    }

    pub fn has_global(&self, interface: &str) -> bool {
        self.globals.values().any(|g| g.interface == interface)
    }

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    pub fn supports(&self, format: PixelFormat) -> bool {
        self.formats.contains(&format)
    }

    pub fn formats(&self) -> &[PixelFormat] {
        &self.formats
    }

    pub fn outputs(&self) -> Vec<Output> {
        self.outputs.values().copied().collect()
    }

    /// The output sharing the largest area with `rect`, or the first output
    /// when `rect` lies outside all of them.
    pub fn output_for(&self, rect: &Rect) -> Option<Output> {
        let best = self
            .outputs
            .values()
            .filter_map(|o| o.rect.intersection(rect).map(|i| (i.area(), *o)))
            .max_by_key(|(area, _)| *area)
            .map(|(_, o)| o);
        best.or_else(|| self.outputs.values().next().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(id: u32, rect: Rect, scale: u32) -> ProtocolEvent {
        ProtocolEvent::OutputAdded {
            output: ObjectId(id),
            rect,
            scale,
        }
    }

    #[test]
    fn test_globals_are_tracked_and_removed() {
        let mut registry = Registry::new();
        let change = registry.apply(&ProtocolEvent::Global {
            name: 3,
            interface: "wl_shm".into(),
            version: 1,
        });
        assert_eq!(change, RegistryChange::Globals);
        assert!(registry.has_global("wl_shm"));

        registry.apply(&ProtocolEvent::GlobalRemove { name: 3 });
        assert!(!registry.has_global("wl_shm"));
        assert_eq!(
            registry.apply(&ProtocolEvent::GlobalRemove { name: 3 }),
            RegistryChange::None
        );
    }

    #[test]
    fn test_unknown_format_is_skipped() {
        let mut registry = Registry::new();
        assert_eq!(
            registry.apply(&ProtocolEvent::ShmFormat { format: 0x3432_5258 }),
            RegistryChange::None
        );
        registry.apply(&ProtocolEvent::ShmFormat { format: 1 });
        registry.apply(&ProtocolEvent::ShmFormat { format: 1 });
        assert_eq!(registry.formats(), &[PixelFormat::Xrgb8888]);
        assert!(!registry.supports(PixelFormat::Argb8888));
    }

    #[test]
    fn test_output_for_prefers_largest_overlap() {
        let mut registry = Registry::new();
        registry.apply(&output(1, Rect::new(0, 0, 1920, 1080), 1));
        registry.apply(&output(2, Rect::new(1920, 0, 2560, 1440), 2));

        let mostly_right = Rect::new(1800, 100, 400, 300);
        assert_eq!(registry.output_for(&mostly_right).unwrap().id, ObjectId(2));

        let offscreen = Rect::new(-5000, -5000, 10, 10);
        assert_eq!(registry.output_for(&offscreen).unwrap().id, ObjectId(1));
    }

    #[test]
    fn test_zero_scale_is_clamped() {
        let mut registry = Registry::new();
        registry.apply(&output(1, Rect::new(0, 0, 800, 600), 0));
        assert_eq!(registry.outputs()[0].scale, 1);

        registry.apply(&ProtocolEvent::OutputRemoved { output: ObjectId(1) });
        assert!(registry.outputs().is_empty());
        assert!(registry.output_for(&Rect::new(0, 0, 1, 1)).is_none());
    }
}
