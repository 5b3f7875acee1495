//! UI layer for the reconciliation GUI.

pub mod app;

pub use app::ReconGuiApp;
