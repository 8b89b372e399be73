pub mod application_layer_feedback;
pub mod picture_loss_indication;
