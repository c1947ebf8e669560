//! Transform adapters from backend row shapes into display models.

pub mod drug;
