use anyhow::Result;

use room_session::{DirectoryClient, RoomKind, RoomSummary};

use crate::config::FileConfig;

/// List the rooms visible to the current user.
pub async fn rooms(config: &FileConfig) -> Result<()> {
    let client = DirectoryClient::new(&config.backend.base_url, &config.backend.token);
    let rooms = client.list_rooms().await?;

    if rooms.is_empty() {
        println!("no rooms visible");
        return Ok(());
    }
    for room in &rooms {
        println!("{}", format_room(room));
    }
    Ok(())
}

fn format_room(room: &RoomSummary) -> String {
    let kind = match room.kind {
        RoomKind::Private => "private",
        RoomKind::Department => "department",
        RoomKind::Company => "company",
    };
    if room.unread_count > 0 {
        format!(
            "{:<24} {:<12} {} ({} unread)",
            room.id, kind, room.name, room.unread_count
        )
    } else {
        format!("{:<24} {:<12} {}", room.id, kind, room.name)
    }
}
