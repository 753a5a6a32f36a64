mod discovered_view;
mod listen_view;
mod painter;
mod record_view;
mod table;

pub(crate) use self::discovered_view::DiscoveredView;
pub(crate) use self::listen_view::{
    BatchLineView, ListenSummaryView, ListenTargetView, StateLineView,
};
pub(crate) use self::painter::Painter;
pub(crate) use self::record_view::SessionRecordView;
