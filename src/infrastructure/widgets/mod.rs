pub mod prompt;
pub mod static_token;

use anyhow::Result;

use crate::domain::models::WidgetBox;
use crate::domain::models::WidgetName;

pub struct WidgetManager {}

impl WidgetManager {
    pub fn get(name: WidgetName) -> Result<WidgetBox> {
        match name {
            WidgetName::Prompt => return Ok(Box::<prompt::PromptWidget>::default()),
            WidgetName::Static => return Ok(Box::<static_token::StaticWidget>::default()),
        }
    }
}
