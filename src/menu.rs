//! Custom-menu definitions provisioned after a successful install.

// self
use crate::{_prelude::*, auth::LocationId};

/// How the platform opens the menu link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuOpenMode {
	/// Embedded frame inside the platform UI.
	#[default]
	Iframe,
	/// New browser tab.
	NewTab,
	/// Current browser tab.
	CurrentTab,
}
impl FromStr for MenuOpenMode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"iframe" => Ok(Self::Iframe),
			"new_tab" => Ok(Self::NewTab),
			"current_tab" => Ok(Self::CurrentTab),
			other => Err(format!("unknown open mode `{other}`")),
		}
	}
}

/// Where a menu is provisioned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MenuTarget {
	/// Visible on the agency view and every location.
	Global,
	/// Visible on a single location.
	Location(LocationId),
}
impl MenuTarget {
	/// Builds the target for an optional resolved location.
	pub fn for_location(location: Option<&LocationId>) -> Self {
		location.cloned().map_or(Self::Global, Self::Location)
	}
}

/// Static description of the menu entry the broker provisions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuDefinition {
	/// Label shown in the sidebar.
	pub title: String,
	/// Link opened by the menu.
	pub url: Url,
	/// Font Awesome icon name.
	pub icon: Option<String>,
	/// Open mode.
	pub open_mode: MenuOpenMode,
}
impl MenuDefinition {
	/// Creates a definition that opens `url` in an iframe.
	pub fn new(title: impl Into<String>, url: Url) -> Self {
		Self { title: title.into(), url, icon: None, open_mode: MenuOpenMode::default() }
	}

	/// Sets the icon name.
	pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
		self.icon = Some(icon.into());

		self
	}

	/// Sets the open mode.
	pub fn with_open_mode(mut self, mode: MenuOpenMode) -> Self {
		self.open_mode = mode;

		self
	}

	/// JSON body for the custom-menu endpoint.
	pub fn payload(&self, target: &MenuTarget) -> serde_json::Value {
		let (global, locations) = match target {
			MenuTarget::Global => (true, Vec::<String>::new()),
			MenuTarget::Location(id) => (false, vec![id.to_string()]),
		};
		let mut payload = serde_json::json!({
			"title": self.title,
			"url": self.url.as_str(),
			"showOnCompany": global,
			"showOnLocation": true,
			"showToAllLocations": global,
			"locations": locations,
			"openMode": self.open_mode,
			"userRole": "all",
		});

		if let Some(icon) = self.icon.as_deref() {
			payload["icon"] = serde_json::json!({ "name": icon, "fontFamily": "fas" });
		}

		payload
	}
}
