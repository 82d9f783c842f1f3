use tauri::Manager;
use whitetail_core::api::v1::{self, ApiState};
use whitetail_core::env::ProcessEnv;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    tauri::Builder::default()
        .setup(|app| {
            let state = ApiState::from_env(&ProcessEnv)?;
            log::info!(target: "app", "Whitetail ready with {} provider(s)", state.list_providers().len());
            app.manage(state);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            v1::ping,
            v1::list_providers,
            v1::active_session,
            v1::send_message,
            v1::request_prediction,
            v1::switch_provider,
            v1::set_thinking_mode,
            v1::set_location,
            v1::update_boundary,
            v1::toggle_deer_layer,
            v1::viewport_idle,
            v1::deer_layer,
            v1::list_events
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
